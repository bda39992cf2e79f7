//! Viewer sinks.

use crossbeam_channel::TrySendError;
use tokio::sync::mpsc;

use relay_bitstream::CodedUnit;

use crate::error::DeliveryError;

/// A per-viewer delivery target.
///
/// `deliver` is called once per unit while the hub's lock is held, so it
/// must not block: hand the unit to a bounded queue drained by the viewer's
/// own task and fail when that queue is full. It must not call back into
/// the hub; returning an error is how a sink asks to be detached.
pub trait Sink: Send {
    fn deliver(&mut self, unit: &CodedUnit) -> Result<(), DeliveryError>;
}

impl Sink for crossbeam_channel::Sender<CodedUnit> {
    fn deliver(&mut self, unit: &CodedUnit) -> Result<(), DeliveryError> {
        self.try_send(unit.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Disconnected(_) => DeliveryError::Closed,
        })
    }
}

impl Sink for mpsc::Sender<CodedUnit> {
    fn deliver(&mut self, unit: &CodedUnit) -> Result<(), DeliveryError> {
        self.try_send(unit.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// A sink backed by a closure.
pub struct FnSink<F>(F);

/// Wrap a closure as a [`Sink`].
pub fn from_fn<F>(f: F) -> FnSink<F>
where
    F: FnMut(&CodedUnit) -> Result<(), DeliveryError> + Send,
{
    FnSink(f)
}

impl<F> Sink for FnSink<F>
where
    F: FnMut(&CodedUnit) -> Result<(), DeliveryError> + Send,
{
    fn deliver(&mut self, unit: &CodedUnit) -> Result<(), DeliveryError> {
        (self.0)(unit)
    }
}
