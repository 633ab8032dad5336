mod backoff_retry;
mod load_dotenv;

pub use backoff_retry::backoff_retry;
pub use load_dotenv::load_dotenv;

pub mod base_path;

use rand::RngCore;

pub fn rand_hex(bytes: usize) -> String {
    let mut rand = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut rand);
    hex::encode(rand)
}
