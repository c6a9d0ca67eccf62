//! Fast-path emission configuration

/// Which acceleration paths the emitter may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitConfig {
    /// Push on calls and predict returns with the shadow stack.
    /// When disabled, returns go through the IBTC like any computed jump.
    pub enable_shadow_stack: bool,

    /// Resolve computed jumps (and unpredicted returns) through the IBTC.
    /// When disabled, they re-enter the dispatcher.
    pub enable_ibtc: bool,

    /// Jump straight to host code when a direct target is already translated
    pub allow_direct_jumps: bool,
}

impl EmitConfig {
    pub fn new() -> Self {
        Self {
            enable_shadow_stack: true,
            enable_ibtc: true,
            allow_direct_jumps: true,
        }
    }

    /// Everything through the dispatcher, e.g. for single-stepping.
    pub fn dispatch_only() -> Self {
        Self {
            enable_shadow_stack: false,
            enable_ibtc: false,
            allow_direct_jumps: false,
        }
    }

    pub fn with_shadow_stack(mut self, enable: bool) -> Self {
        self.enable_shadow_stack = enable;
        self
    }

    pub fn with_ibtc(mut self, enable: bool) -> Self {
        self.enable_ibtc = enable;
        self
    }

    pub fn with_direct_jumps(mut self, enable: bool) -> Self {
        self.allow_direct_jumps = enable;
        self
    }
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self::new()
    }
}
