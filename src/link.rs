use core::sync::atomic::{AtomicBool, Ordering};

/// Published state of the network link.
///
/// Written only by the connectivity unit, read by the reporter.
pub struct LinkState {
    up: AtomicBool,
}

impl LinkState {
    pub const fn new() -> Self {
        Self {
            up: AtomicBool::new(false),
        }
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self, up: bool) {
        let was = self.up.swap(up, Ordering::AcqRel);
        if was != up {
            log::info!("link {}", if up { "up" } else { "down" });
        }
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    #[error("association timed out")]
    Timeout,
    #[error("association rejected")]
    Association,
    #[error("no address from dhcp")]
    Dhcp,
}

/// The radio as seen by the connectivity unit.
#[allow(async_fn_in_trait)]
pub trait Radio {
    /// Associates and waits until the interface has an address.
    async fn connect(&mut self) -> Result<(), RadioError>;

    async fn wait_disconnected(&mut self);
}

/// Sole writer of [`LinkState`].
pub struct Connectivity<'a, R> {
    radio: R,
    link: &'a LinkState,
}

impl<'a, R: Radio> Connectivity<'a, R> {
    pub fn new(radio: R, link: &'a LinkState) -> Self {
        Self { radio, link }
    }

    /// Brings the link up once and tracks it until it drops.
    ///
    /// Reconnection is left to whoever owns the radio, so this returns
    /// after a failed association or after the first disconnect.
    pub async fn run(&mut self) -> Result<(), RadioError> {
        log::info!("connectivity: associating");
        if let Err(err) = self.radio.connect().await {
            log::warn!("connectivity: {}, continuing without network", err);
            self.link.publish(false);
            return Err(err);
        }
        self.link.publish(true);

        self.radio.wait_disconnected().await;
        log::warn!("connectivity: disconnected");
        self.link.publish(false);
        Ok(())
    }

    pub fn into_radio(self) -> R {
        self.radio
    }
}
