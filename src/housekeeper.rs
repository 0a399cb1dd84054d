use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

struct Signal {
	stopped: Mutex<bool>,
	wake: Condvar,
}

/// Background thread that runs a maintenance job every `tick`.
///
/// The job returns `false` once its target is gone, which ends the thread.
/// [`stop`](Self::stop) wakes the thread and joins it, so no job runs after
/// it returns. Dropping the housekeeper stops it.
pub(crate) struct Housekeeper {
	name: String,
	signal: Arc<Signal>,
	handle: Option<JoinHandle<()>>,
}

impl Housekeeper {
	/// Spawn a thread named `{name}-housekeeper`.
	///
	/// Returns `None` if the thread cannot be spawned; the caller then runs
	/// without background maintenance.
	pub(crate) fn spawn<F>(name: &str, tick: Duration, mut job: F) -> Option<Self>
	where
		F: FnMut() -> bool + Send + 'static,
	{
		let signal = Arc::new(Signal {
			stopped: Mutex::new(false),
			wake: Condvar::new(),
		});
		let thread_signal = Arc::clone(&signal);

		let spawned = thread::Builder::new().name(format!("{name}-housekeeper")).spawn(move || {
			loop {
				{
					let mut stopped = thread_signal.stopped.lock();
					if !*stopped {
						thread_signal.wake.wait_for(&mut stopped, tick);
					}
					if *stopped {
						break;
					}
				}
				if !job() {
					break;
				}
			}
		});

		match spawned {
			Ok(handle) => {
				info!(cache = %name, ?tick, "housekeeper started");
				Some(Self {
					name: name.to_string(),
					signal,
					handle: Some(handle),
				})
			}
			Err(err) => {
				warn!(cache = %name, error = %err, "failed to spawn housekeeper; background maintenance disabled");
				None
			}
		}
	}

	/// Signal the thread and wait for it to exit. Idempotent.
	pub(crate) fn stop(&mut self) {
		let Some(handle) = self.handle.take() else {
			return;
		};
		*self.signal.stopped.lock() = true;
		self.signal.wake.notify_all();

		if handle.join().is_err() {
			warn!(cache = %self.name, "housekeeper thread panicked");
		} else {
			info!(cache = %self.name, "housekeeper stopped");
		}
	}
}

impl Drop for Housekeeper {
	fn drop(&mut self) {
		self.stop();
	}
}
