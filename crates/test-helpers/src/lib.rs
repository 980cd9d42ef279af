//! Test helpers for the SPoS consensus runtime.
//!
//! Two kinds of helpers live here:
//!
//! - deterministic fixtures: seeded key pairs, peer ids and headers, so two
//!   tests building "validator 3" get byte-identical keys;
//! - recording stubs of every capability trait in `spos-core`. Stubs are
//!   `Clone` and share their state between clones, so a test keeps one handle
//!   for assertions and passes the other into the component under test.

mod fixtures;
mod stubs;

pub use fixtures::{
    bls_keypair, ed25519_keypair, meta_header, miniblock, miniblock_header, peer_id, shard_header,
    signed, FIXTURE_CHAIN_ID,
};
pub use stubs::{
    RecordingMessenger, RecordingShardingCollector, SentMessage, StubAntiflood,
    StubBlockProcessor, StubHeadersPool, StubInterceptor, StubInterceptorsContainer,
    StubKeysHandler, StubNodeRedundancy, StubNodesCoordinator, StubPeerSignatureHandler,
};
