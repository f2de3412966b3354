/**
 * P-256 keys, ECDH agreement and the
 *  padded AES-128 session cipher.
 */
pub mod crypto;
/**
 * On-disk identity and membership table,
 *  fronted by a single-writer actor.
 */
pub mod store;
/**
 * Pluggable yes/no decisions for
 *  first-contact peers.
 */
pub mod admission;
/**
 * Length-prefixed encrypted payload framing.
 */
pub mod channel;
/**
 * Per-connection state machine for
 *  both the accepting and initiating role.
 */
pub mod handshake;
/**
 * TCP accept loop driving the accepting role.
 */
pub mod server;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

mod deadline;
