mod resources;
mod session;
