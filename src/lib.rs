pub mod command;
pub mod constants;
pub mod helpers;
pub mod interfaces;
pub mod knot;
pub mod settings;
