mod devices;
mod run;

pub use devices::devices;
pub use run::run;
