use std::{thread, time::Duration};

use mio_extras::channel::{SyncSender, TrySendError};

const TIMEOUT_EPSILON: Duration = Duration::from_micros(1);

// By default, give background thread 20 ms to react
pub const TIMEOUT_FALLBACK: Duration = Duration::from_millis(20);

/// `try_send`, retried with exponential backoff while the channel is full,
/// until `timeout_opt` (or [`TIMEOUT_FALLBACK`]) has passed.
pub fn try_send_timeout<T>(
  sender: &SyncSender<T>,
  t: T,
  timeout_opt: Option<Duration>,
) -> Result<(), TrySendError<T>> {
  match sender.try_send(t) {
    Ok(()) => Ok(()), // This is expected to be the common case

    Err(TrySendError::Full(tt)) => {
      let mut mt = tt;
      let mut time_left = timeout_opt.unwrap_or(TIMEOUT_FALLBACK);
      let mut delay = TIMEOUT_EPSILON;
      while time_left > TIMEOUT_EPSILON {
        match sender.try_send(mt) {
          Ok(()) => return Ok(()),
          Err(TrySendError::Full(tt)) => {
            thread::sleep(delay.min(time_left)); // and try again
            mt = tt;
            time_left = time_left.saturating_sub(delay);
            delay *= 2;
          }
          Err(other) => return Err(other),
        }
      }
      Err(TrySendError::Full(mt))
    }
    Err(other) => Err(other),
  }
}
