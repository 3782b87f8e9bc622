use std::collections::BTreeMap;
use std::fmt::Formatter;
use std::sync::Arc;

use tracing::trace;

use crate::name_of;

use super::*;

/// Callback receiving the value of a server-initiated push for one
/// characteristic.
#[derive(Clone)]
#[repr(transparent)]
pub struct ValueSink(Arc<dyn Fn(&[u8]) + Send + Sync>);

impl Debug for ValueSink {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        (f.debug_tuple(name_of!(ValueSink)).field(&Arc::as_ptr(&self.0))).finish()
    }
}

impl<F: Fn(&[u8]) + Send + Sync + 'static> From<F> for ValueSink {
    #[inline(always)]
    fn from(f: F) -> Self {
        Self(Arc::new(f))
    }
}

/// Maps of value handles to their notification and indication sinks. Entries
/// change only when a Client Characteristic Configuration write succeeds.
#[derive(Debug, Default)]
pub(super) struct SinkMap {
    ntf: parking_lot::Mutex<BTreeMap<Handle, ValueSink>>,
    ind: parking_lot::Mutex<BTreeMap<Handle, ValueSink>>,
}

impl SinkMap {
    /// Registers or removes the sinks for a value handle.
    pub fn configure(&self, hdl: Handle, ntf: Option<ValueSink>, ind: Option<ValueSink>) {
        Self::set(&mut self.ntf.lock(), hdl, ntf);
        Self::set(&mut self.ind.lock(), hdl, ind);
    }

    /// Delivers a notification value. A handle without a sink is dropped
    /// silently.
    pub fn notify(&self, hdl: Handle, v: &[u8]) {
        Self::exec(&self.ntf, hdl, v);
    }

    /// Delivers an indication value. Wire confirmation has already been sent
    /// by the bearer at this point.
    pub fn indicate(&self, hdl: Handle, v: &[u8]) {
        Self::exec(&self.ind, hdl, v);
    }

    fn set(m: &mut BTreeMap<Handle, ValueSink>, hdl: Handle, sink: Option<ValueSink>) {
        match sink {
            Some(sink) => {
                m.insert(hdl, sink);
            }
            None => {
                m.remove(&hdl);
            }
        }
    }

    fn exec(m: &parking_lot::Mutex<BTreeMap<Handle, ValueSink>>, hdl: Handle, v: &[u8]) {
        // The sink is cloned out so that no lock is held across user code
        let Some(sink) = m.lock().get(&hdl).cloned() else {
            trace!("No subscription for {hdl}");
            return;
        };
        (sink.0)(v);
    }
}
