//! Generation status bitmask.

bitflags::bitflags! {
    /// Reasons the generation pipeline is currently passing frames through.
    ///
    /// An empty set means healthy. Several conditions can be active at once.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Status: u32 {
        /// Output resolution is below the configured minimum.
        const RESOLUTION_TOO_LOW       = 1 << 0;
        /// A mandatory tagged buffer (depth, motion vectors, hud-less color) is missing.
        const TAG_RESOURCES_INVALID    = 1 << 1;
        /// No per-frame transform data was found for the current frame.
        const COMMON_CONSTANTS_INVALID = 1 << 2;
        /// The compute backend cannot run the kernels.
        const UNSUPPORTED_HARDWARE     = 1 << 3;
    }
}

impl Status {
    /// Conditions that are re-evaluated on every present.
    pub const PER_FRAME: Status = Status::TAG_RESOURCES_INVALID.union(Status::COMMON_CONSTANTS_INVALID);

    /// Conditions that only change on resize or startup.
    pub const STICKY: Status = Status::RESOLUTION_TOO_LOW.union(Status::UNSUPPORTED_HARDWARE);

    /// No failure condition is active.
    #[inline]
    pub fn is_ok(self) -> bool {
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bits_match_wire_values() {
        assert_eq!(Status::RESOLUTION_TOO_LOW.bits(), 1);
        assert_eq!(Status::TAG_RESOURCES_INVALID.bits(), 2);
        assert_eq!(Status::COMMON_CONSTANTS_INVALID.bits(), 4);
        assert_eq!(Status::UNSUPPORTED_HARDWARE.bits(), 8);
    }

    #[test]
    fn test_status_partition() {
        assert!(Status::default().is_ok());
        assert_eq!(Status::PER_FRAME | Status::STICKY, Status::all());
        assert!(Status::PER_FRAME.intersection(Status::STICKY).is_empty());
    }
}
