//! The product's REST resources and how their keys and paths are built.

use std::fmt;
use std::str::FromStr;

use tally_types::QueryKey;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Expenses,
    Contacts,
    Settings,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Expenses, Resource::Contacts, Resource::Settings];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Resource::Expenses => "expenses",
            Resource::Contacts => "contacts",
            Resource::Settings => "settings",
        }
    }

    /// Filter matching every cached read of this resource.
    #[must_use]
    pub fn all_keys(self) -> QueryKey {
        QueryKey::new(self.as_str())
    }

    #[must_use]
    pub fn list_key(self, page: Option<u32>) -> QueryKey {
        match page {
            Some(page) => self.all_keys().with("page", page),
            None => self.all_keys(),
        }
    }

    #[must_use]
    pub fn item_key(self, id: &str) -> QueryKey {
        self.all_keys().with("id", id)
    }

    #[must_use]
    pub fn list_path(self, page: Option<u32>) -> String {
        match page {
            Some(page) => format!("/{}?page={page}", self.as_str()),
            None => format!("/{}", self.as_str()),
        }
    }

    #[must_use]
    pub fn item_path(self, id: &str) -> String {
        format!("/{}/{id}", self.as_str())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resource {0:?} (expected one of: expenses, contacts, settings)")]
pub struct UnknownResource(pub String);

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|resource| resource.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownResource(s.to_string()))
    }
}
