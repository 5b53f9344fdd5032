#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! The gossip-aggregation state machine: the Publisher loop, the Subscriber
//! loop, and the aggregation decision between them.
//!
//! Everything else in this workspace is external collaborator surface
//! plugged in here behind narrow traits (`PriceTicker`, `Transport`,
//! `PriceMessageRepository`), wiring the feed/network/storage crates
//! together behind trait objects rather than depending on their concrete
//! types directly.

pub mod publisher;
pub mod subscriber;

pub use publisher::{run as run_publisher, PublisherConfig};
pub use subscriber::{run as run_subscriber, SubscriberConfig};
