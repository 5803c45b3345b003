use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::control_interface::{KeyLightClient, LightUpdate};

/// Quiet period a control has to hold still before its value is sent.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Runs only the last of a burst of calls, once `window` has passed without
/// a newer one.
///
/// Calls that already started are not cancelled.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            pending: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedules `task`, dropping whatever was scheduled before and has not
    /// fired yet. Must be called inside a tokio runtime.
    pub fn call<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let window = self.window;
        *pending = Some(tokio::spawn(async move {
            sleep(window).await;
            task.await;
        }));
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Debouncer::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(handle) = pending.take() {
                handle.abort();
            }
        }
    }
}

/// One light with a debouncer per control, the way a slider-driven UI
/// talks to it.
///
/// Failed updates are logged; the next user input simply tries again.
pub struct DebouncedLight {
    client: Arc<KeyLightClient>,
    power: Debouncer,
    brightness: Debouncer,
    temperature: Debouncer,
}

impl DebouncedLight {
    pub fn new(client: KeyLightClient) -> Self {
        Self::with_window(client, DEFAULT_DEBOUNCE_WINDOW)
    }

    pub fn with_window(client: KeyLightClient, window: Duration) -> Self {
        DebouncedLight {
            client: Arc::new(client),
            power: Debouncer::new(window),
            brightness: Debouncer::new(window),
            temperature: Debouncer::new(window),
        }
    }

    pub fn client(&self) -> &KeyLightClient {
        &self.client
    }

    pub fn set_power(&self, on: bool) {
        self.power.call(send(self.client.clone(), LightUpdate::power(on)));
    }

    pub fn set_brightness(&self, brightness: i32) {
        self.brightness
            .call(send(self.client.clone(), LightUpdate::brightness(brightness)));
    }

    /// Takes the mired value, see [`crate::util::temperature`].
    pub fn set_temperature(&self, mired: i32) {
        self.temperature
            .call(send(self.client.clone(), LightUpdate::temperature(mired)));
    }
}

async fn send(client: Arc<KeyLightClient>, update: LightUpdate) {
    debug!("Sending debounced update {:?} to {}", update, client.url());
    if let Err(e) = client.update(&update).await {
        error!("Update of {} failed: {}", client.url(), e);
    }
}
