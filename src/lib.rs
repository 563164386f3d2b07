//! Linkrelay: pairs a dApp client with a wallet app through code-based
//! linking and relays asynchronous calls between them over per-recipient
//! ordered feeds. Neither side needs a network path to the other.
//!
//! # Architecture
//!
//! ```text
//! Linker (facade)
//!   │
//!   ├── TokenStore ×2      client / wallet bearer identities
//!   ├── LinkCodeRegistry   short-lived single-use pairing codes
//!   ├── LinkTable          established client⇄wallet links
//!   ├── MessageRelay       per-recipient feeds: backlog replay + live tail
//!   └── CallCoordinator    Call → wallet feed, CallResult → session feed
//! ```
//!
//! # Flow
//!
//! 1. Client `generate-code` → scannable code (or `linked=true` short-circuit)
//! 2. Wallet `link-info`, then `link-wallet` — the code is consumed exactly
//!    once; the loser of a double scan gets `AlreadyConsumed`
//! 3. Client `call-wallet` → Call fans out onto every linked wallet's feed
//! 4. Wallet streams its feed, executes, posts `wallet-called`
//! 5. Client streams its session feed and resolves the pending call
//!
//! Feeds deliver gap-free, monotonically increasing sequence ids per
//! recipient; a consumer reconnecting with its last acknowledged read id
//! replays everything it missed (within the bounded backlog) and then tails.
//!
//! # Usage
//!
//! ```ignore
//! use linkrelay::{create_router, Linker, LinkerConfig};
//! use std::sync::Arc;
//!
//! let linker = Arc::new(Linker::new(LinkerConfig::new()));
//! let app = create_router(linker);
//! // axum::serve(listener, app) ...
//! ```

pub mod error;
pub mod linker;
pub mod logging;
pub mod relay;
pub mod runtime;
pub mod server;
pub mod token;

pub use error::{LinkerError, LinkerResult};
pub use linker::calls::{Call, CallResult, FeedEvent};
pub use linker::codes::PendingLink;
pub use linker::links::Link;
pub use linker::{CodeGrant, LinkGrant, LinkInfo, Linker, LinkerConfig};
pub use relay::{FeedMessage, MessageRelay, Subscription};
pub use runtime::{install_signal_handlers, Shutdown};
pub use server::{create_router, create_router_with_name};
pub use token::{ClientToken, TokenStore, WalletToken};
