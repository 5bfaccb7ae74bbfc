pub mod imaging;
pub mod logging;
