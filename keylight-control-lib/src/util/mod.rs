pub mod debounce;
pub mod discovery;
pub mod temperature;
pub mod version;
