//! Vendor error-code taxonomy.
//!
//! The core special-cases a small set of codes; everything else is logged
//! and left alone. Code numbers follow the vendor wire protocol.

/// Deep market data is not supported for this instrument/venue combination
pub const DEPTH_NOT_SUPPORTED: i32 = 10092;

/// Concurrent tick-by-tick subscription limit reached
pub const TICK_CAPACITY_EXHAUSTED: i32 = 10190;

/// Connectivity between the vendor gateway and its upstream has been lost
pub const CONNECTIVITY_LOST: i32 = 1100;

/// Informational farm/connectivity status codes that must not be escalated
const INFORMATIONAL: &[i32] = &[
    1101, // connectivity restored, data lost
    1102, // connectivity restored, data maintained
    2103, // market data farm connection is broken
    2104, // market data farm connection is OK
    2105, // historical data farm is broken
    2106, // historical data farm is OK
    2107, // historical data farm is inactive
    2108, // market data farm is inactive
    2119, // market data farm is connecting
    2158, // security definition data farm is OK
];

/// Codes fatal to the transport session; trigger the reconnect supervisor
const TRANSPORT_FATAL: &[i32] = &[
    502,  // couldn't connect to the gateway
    504,  // not connected
    1300, // socket port reset
    2110, // gateway-to-server connectivity broken
    CONNECTIVITY_LOST,
];

/// Handling class for a vendor error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCodeClass {
    /// Depth is permanently unsupported for the instrument (until cool-off)
    DepthUnsupported,
    /// The tick-by-tick concurrency cap was hit; free the slot
    TickCapacityExhausted,
    /// Status noise; ignore
    Informational,
    /// Session-level failure; reconnect
    TransportFatal,
    /// Not special-cased; log and continue
    Unclassified,
}

/// Classify a vendor error code for routing.
pub fn classify(code: i32) -> ErrorCodeClass {
    if code == DEPTH_NOT_SUPPORTED {
        ErrorCodeClass::DepthUnsupported
    } else if code == TICK_CAPACITY_EXHAUSTED {
        ErrorCodeClass::TickCapacityExhausted
    } else if TRANSPORT_FATAL.contains(&code) {
        ErrorCodeClass::TransportFatal
    } else if INFORMATIONAL.contains(&code) {
        ErrorCodeClass::Informational
    } else {
        ErrorCodeClass::Unclassified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_special_cases() {
        assert_eq!(classify(DEPTH_NOT_SUPPORTED), ErrorCodeClass::DepthUnsupported);
        assert_eq!(
            classify(TICK_CAPACITY_EXHAUSTED),
            ErrorCodeClass::TickCapacityExhausted
        );
    }

    #[test]
    fn test_classify_informational() {
        assert_eq!(classify(2104), ErrorCodeClass::Informational);
        assert_eq!(classify(2119), ErrorCodeClass::Informational);
        assert_eq!(classify(1102), ErrorCodeClass::Informational);
    }

    #[test]
    fn test_classify_transport_fatal() {
        assert_eq!(classify(CONNECTIVITY_LOST), ErrorCodeClass::TransportFatal);
        assert_eq!(classify(504), ErrorCodeClass::TransportFatal);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify(9999), ErrorCodeClass::Unclassified);
    }
}
