#![forbid(unsafe_code)]

//! Binding direction, per-binding flags, event masks, and delivery modes.

use std::fmt;

bitflags::bitflags! {
    /// Per-binding option bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BindingFlags: u32 {
        /// Log forward and reverse applies at `info`.
        const TRACE = 1 << 0;
        /// Log invalidate/validate of every node in the subtree at `debug`.
        const VERBOSE = 1 << 1;
        /// Defer validation into the current scope's binding context.
        const QUEUED = 1 << 2;
        /// Always deliver synchronously, even inside a batch.
        const IMMEDIATE = 1 << 3;
        /// Create the binding deactivated.
        const INACTIVE = 1 << 4;
        /// Route events to the scope that created the binding.
        const CROSS_SCOPE = 1 << 5;
        /// Do not write null or UNSET values to the destination.
        const SKIP_NULL = 1 << 6;
        /// Skip the initial forward write performed at initialization.
        const NO_INITIAL = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Event kinds a subscription is interested in.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        const VALUE_INVALIDATED = 1 << 0;
        const VALUE_VALIDATED = 1 << 1;
        const VALUE_CHANGED = Self::VALUE_INVALIDATED.bits() | Self::VALUE_VALIDATED.bits();
        const ARRAY_ELEMENT_INVALIDATED = 1 << 2;
        const ARRAY_ELEMENT_VALIDATED = 1 << 3;
        const ARRAY_ELEMENT_CHANGED =
            Self::ARRAY_ELEMENT_INVALIDATED.bits() | Self::ARRAY_ELEMENT_VALIDATED.bits();
        const VALUE_REQUESTED = 1 << 4;
        const LISTENER_ADDED = 1 << 5;
        const ALL_CHANGES = Self::VALUE_CHANGED.bits() | Self::ARRAY_ELEMENT_CHANGED.bits();
    }
}

impl EventMask {
    /// Whether this mask includes any invalidation bit.
    #[must_use]
    pub fn has_invalidate(self) -> bool {
        self.intersects(Self::VALUE_INVALIDATED | Self::ARRAY_ELEMENT_INVALIDATED)
    }

    /// Whether this mask includes any validation bit.
    #[must_use]
    pub fn has_validate(self) -> bool {
        self.intersects(Self::VALUE_VALIDATED | Self::ARRAY_ELEMENT_VALIDATED)
    }

    /// Short label used in traces.
    #[must_use]
    pub fn label(self) -> &'static str {
        if self == Self::VALUE_INVALIDATED {
            "invalidated"
        } else if self == Self::VALUE_VALIDATED {
            "validated"
        } else if self == Self::VALUE_CHANGED {
            "changed"
        } else if self == Self::ARRAY_ELEMENT_INVALIDATED {
            "element-invalidated"
        } else if self == Self::ARRAY_ELEMENT_VALIDATED {
            "element-validated"
        } else if self == Self::ARRAY_ELEMENT_CHANGED {
            "element-changed"
        } else if self == Self::VALUE_REQUESTED {
            "requested"
        } else if self == Self::LISTENER_ADDED {
            "listener-added"
        } else {
            "mixed"
        }
    }
}

/// Propagation direction of a binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BindingDirection {
    /// `:=` source to destination.
    #[default]
    Forward,
    /// `=:` destination to source.
    Reverse,
    /// `:=:` both ways.
    Bidirectional,
    /// Evaluated on demand, never propagated.
    None,
}

impl BindingDirection {
    #[must_use]
    pub fn do_forward(self) -> bool {
        matches!(self, Self::Forward | Self::Bidirectional)
    }

    #[must_use]
    pub fn do_reverse(self) -> bool {
        matches!(self, Self::Reverse | Self::Bidirectional)
    }

    /// Keep only the forward half of this direction.
    #[must_use]
    pub fn forward_only(self) -> Self {
        if self.do_forward() {
            Self::Forward
        } else {
            Self::None
        }
    }

    /// Operator spelling.
    #[must_use]
    pub fn operator(self) -> &'static str {
        match self {
            Self::Forward => ":=",
            Self::Reverse => "=:",
            Self::Bidirectional => ":=:",
            Self::None => "=",
        }
    }
}

impl fmt::Display for BindingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operator())
    }
}

/// How a subscription receives validation events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DeliveryMode {
    /// Synchronous, unless the current scope has an open batch.
    #[default]
    Sync,
    /// Always synchronous.
    Immediate,
    /// Deferred into the current scope's binding context.
    Queued,
}

impl DeliveryMode {
    /// Delivery mode implied by a binding's flags.
    #[must_use]
    pub fn from_flags(flags: BindingFlags) -> Self {
        if flags.contains(BindingFlags::IMMEDIATE) {
            Self::Immediate
        } else if flags.contains(BindingFlags::QUEUED) {
            Self::Queued
        } else {
            Self::Sync
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_predicates() {
        assert!(BindingDirection::Forward.do_forward());
        assert!(!BindingDirection::Forward.do_reverse());
        assert!(BindingDirection::Bidirectional.do_forward());
        assert!(BindingDirection::Bidirectional.do_reverse());
        assert!(!BindingDirection::None.do_forward());
        assert_eq!(BindingDirection::Reverse.forward_only(), BindingDirection::None);
    }

    #[test]
    fn changed_is_both_phases() {
        assert!(EventMask::VALUE_CHANGED.has_invalidate());
        assert!(EventMask::VALUE_CHANGED.has_validate());
        assert!(!EventMask::VALUE_REQUESTED.has_validate());
        assert_eq!(EventMask::VALUE_CHANGED.label(), "changed");
    }

    #[test]
    fn immediate_wins_over_queued() {
        let flags = BindingFlags::QUEUED | BindingFlags::IMMEDIATE;
        assert_eq!(DeliveryMode::from_flags(flags), DeliveryMode::Immediate);
        assert_eq!(
            DeliveryMode::from_flags(BindingFlags::QUEUED),
            DeliveryMode::Queued
        );
    }
}
