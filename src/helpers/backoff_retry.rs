use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::{future::retry_notify, Error, ExponentialBackoff};

/// Retry with exponential backoff, giving up once `max_elapsed` has passed
/// (`None` keeps the crate default of 15 minutes)
pub async fn backoff_retry<F, Fut, T, E>(
    fn_to_try: F,
    max_elapsed: Option<Duration>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error<E>>>,
    E: Display,
{
    let notify = |err, dur: Duration| {
        log::error!("Temporary error after {:.1}s: {}", dur.as_secs_f32(), err);
    };

    let mut policy = ExponentialBackoff::default();
    if max_elapsed.is_some() {
        policy.max_elapsed_time = max_elapsed;
    }

    retry_notify(policy, fn_to_try, notify).await
}
