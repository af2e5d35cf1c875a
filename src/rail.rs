//! USB power rail sequencing.
//!
//! The rail is two regulators plus a vote on the peer's power-path selector:
//!
//! ```text
//! enable:  Off ─► boost on ─► selector → regulated (5 V) ─► usb on ─► On
//! disable: On ─► usb off ─► boost off ─► selector → VBUS ─► Off
//! ```
//!
//! A failed enable step undoes the earlier ones before the error is
//! returned. The disable path has no undo: once the regulators are off,
//! a failed selector vote is reported as is and the rail stays cached as on,
//! so the next disable request walks the whole path again.
//!
//! A sequence started through [`RailSequencer::run`] runs on its own task
//! and finishes, rollback included, even if the caller stops waiting.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::channel::TransactionChannel;
use crate::error::{PmappError, Result};
use crate::regulator::Regulator;

/// Power-select switch addressed by the vote.
pub const USB_PWR_SEL_SWITCH_ID: u32 = 0;

/// Application mask for the high-speed USB voter.
pub const HSUSB_APP_MASK: u32 = 1 << 2;

/// Where the USB rail draws power from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSource {
    /// Straight from VBUS.
    Bus,
    /// Through the 5 V boost regulator.
    Regulated,
}

impl PowerSource {
    #[inline]
    fn vote_command(self) -> u32 {
        match self {
            PowerSource::Bus => 0,
            PowerSource::Regulated => 1,
        }
    }
}

/// Cached rail state. Only a completed sequence changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailState {
    Off,
    On,
}

/// Intermediate points of the power-up sequence, for tracing.
#[derive(Debug, Clone, Copy)]
enum Step {
    BoostEnabled,
    SwitchedToRegulatedSource,
}

/// Sends power-path selector votes to the peer.
///
/// `procedure` is `None` when the negotiated version has no vote procedure;
/// the peer then drives the selector itself and votes are skipped.
pub struct SourceSelector {
    channel: Arc<TransactionChannel>,
    procedure: Option<u32>,
}

impl SourceSelector {
    pub fn new(channel: Arc<TransactionChannel>, procedure: Option<u32>) -> Self {
        Self { channel, procedure }
    }

    pub async fn vote(&self, source: PowerSource) -> Result<()> {
        let Some(procedure) = self.procedure else {
            debug!(?source, "no selector vote procedure in this version, skipping");
            return Ok(());
        };
        self.channel
            .set_only(
                procedure,
                &[source.vote_command(), USB_PWR_SEL_SWITCH_ID, HSUSB_APP_MASK],
            )
            .await
    }
}

/// Drives the rail on and off. Calls are serialised internally.
pub struct RailSequencer {
    boost: Arc<dyn Regulator>,
    usb: Arc<dyn Regulator>,
    state: Mutex<RailState>,
}

impl RailSequencer {
    pub fn new(boost: Arc<dyn Regulator>, usb: Arc<dyn Regulator>) -> Self {
        Self {
            boost,
            usb,
            state: Mutex::new(RailState::Off),
        }
    }

    /// Cached rail state. Waits for a sequence in progress to finish.
    pub async fn state(&self) -> RailState {
        *self.state.lock().await
    }

    /// Run [`set`](Self::set) on its own task and wait for it.
    ///
    /// Dropping the returned future does not stop the sequence.
    pub async fn run(self: Arc<Self>, selector: SourceSelector, enable: bool) -> Result<()> {
        let task = tokio::spawn(async move { self.set(&selector, enable).await });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!(error = %e, enable, "rail sequence task cancelled");
                Err(PmappError::Interrupted)
            }
        }
    }

    /// Turn the rail on or off. A request for the current state does nothing.
    pub async fn set(&self, selector: &SourceSelector, enable: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let target = if enable { RailState::On } else { RailState::Off };
        if *state == target {
            trace!(?target, "rail already in requested state");
            return Ok(());
        }

        if enable {
            self.power_up(selector).await?;
        } else {
            self.power_down(selector).await?;
        }

        info!(?target, "USB rail switched");
        *state = target;
        Ok(())
    }

    async fn power_up(&self, selector: &SourceSelector) -> Result<()> {
        self.boost.enable()?;
        trace!(step = ?Step::BoostEnabled);

        if let Err(e) = selector.vote(PowerSource::Regulated).await {
            warn!(error = %e, "selector vote failed, disabling boost");
            self.undo(self.boost.disable(), "boost disable");
            return Err(e);
        }
        trace!(step = ?Step::SwitchedToRegulatedSource);

        if let Err(e) = self.usb.enable() {
            warn!(error = %e, "USB regulator enable failed, rolling back");
            self.undo(selector.vote(PowerSource::Bus).await, "selector vote");
            self.undo(self.boost.disable(), "boost disable");
            return Err(e);
        }
        Ok(())
    }

    async fn power_down(&self, selector: &SourceSelector) -> Result<()> {
        self.usb.disable()?;
        self.boost.disable()?;
        selector.vote(PowerSource::Bus).await
    }

    fn undo(&self, result: Result<()>, step: &str) {
        if let Err(e) = result {
            warn!(step, error = %e, "rollback step failed");
        }
    }
}
