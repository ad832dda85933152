//! Client classification from its `HELLO` payload: the one place that
//! decides whether a freshly connected socket is a renderer or a producer.
//! Kept as a single pure function so every combination of inputs is
//! exhaustively testable without a live connection.

use crate::codec::messages::HelloPayload;

/// Build-tag substring that marks a full producer, as opposed to the
/// lighter-weight `"python"` producer-lite client type.
pub const PRODUCER_BUILD_TAG: &str = "spectra-producer";

/// What a connection turned out to be, once its `HELLO` arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientClass {
    /// Owns an OS window and displays figures; gets a session-graph entry.
    Renderer,
    /// Originates figures; no session-graph entry of its own.
    Producer,
    /// A lightweight (`client_type == "python"`) producer. Same broker
    /// semantics as `Producer`, kept as a distinct variant for logging.
    ProducerLite,
}

impl ClientClass {
    /// Whether this class is any flavor of producer.
    #[must_use]
    pub fn is_producer(self) -> bool {
        matches!(self, ClientClass::Producer | ClientClass::ProducerLite)
    }
}

/// Classify a connection from its decoded `HELLO` payload.
///
/// `client_type == "python"` is checked first, an explicit and unambiguous
/// producer-lite marker. Then `agent_build` is sniffed for the producer
/// build tag. Everything else, including an absent `client_type`, defaults
/// to renderer.
#[must_use]
pub fn classify(hello: &HelloPayload) -> ClientClass {
    if hello.client_type == "python" {
        return ClientClass::ProducerLite;
    }
    if hello.agent_build.contains(PRODUCER_BUILD_TAG) {
        return ClientClass::Producer;
    }
    ClientClass::Renderer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(client_type: &str, agent_build: &str) -> HelloPayload {
        HelloPayload { client_type: client_type.to_owned(), agent_build: agent_build.to_owned(), ..Default::default() }
    }

    #[test]
    fn python_client_type_is_producer_lite() {
        assert_eq!(classify(&hello("python", "")), ClientClass::ProducerLite);
    }

    #[test]
    fn agent_client_type_is_renderer() {
        assert_eq!(classify(&hello("agent", "test/0.1")), ClientClass::Renderer);
    }

    #[test]
    fn absent_client_type_defaults_to_renderer() {
        assert_eq!(classify(&hello("", "")), ClientClass::Renderer);
    }

    #[test]
    fn agent_build_sniff_detects_producer() {
        assert_eq!(classify(&hello("", "spectra-producer/1.2.0")), ClientClass::Producer);
    }

    #[test]
    fn python_type_wins_over_producer_build_tag() {
        assert_eq!(classify(&hello("python", "spectra-producer/1.2.0")), ClientClass::ProducerLite);
    }

    #[test]
    fn is_producer_covers_both_producer_variants() {
        assert!(ClientClass::Producer.is_producer());
        assert!(ClientClass::ProducerLite.is_producer());
        assert!(!ClientClass::Renderer.is_producer());
    }
}
