//! Parameter routing: AP chains or the DSP.
//!
//! Volume, rotation, and room-mode updates take one of two paths
//! depending on offload state. The selection is made once per
//! spatialization transition and consulted by every subsequent update
//! instead of re-deriving it at each call site.

/// Destination for effect parameter updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamSink {
    /// Re-parameterize the AP-side chains via SET_PARAM.
    #[default]
    Ap,
    /// Push to the DSP through the HDI proxy.
    Dsp,
}

impl ParamSink {
    /// Sink matching the offload flag.
    pub fn select(offload_enabled: bool) -> Self {
        if offload_enabled {
            ParamSink::Dsp
        } else {
            ParamSink::Ap
        }
    }
}
