//! Command handlers for the Auction context.
//!
//! Each handler runs one request as a single logical unit: load the
//! aggregate, check ownership, apply the business rule, then commit the state
//! change and its integration event together through the outbox. The caller
//! sees the result of the local commit only; delivery to other services
//! happens later.

use auctionhouse_core::aggregate::AggregateRoot;
use auctionhouse_core::clock::Clock;
use auctionhouse_core::command::Command;
use auctionhouse_core::error::DomainError;
use auctionhouse_core::event::IntegrationEvent;
use auctionhouse_core::outbox::publish_with_mutation;
use auctionhouse_core::repository::{AggregateStore, Mutation};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::query_handlers::AuctionView;
use crate::domain::aggregates::Auction;
use crate::domain::commands::{CreateAuction, DeleteAuction, UpdateAuction};

/// Result of a successfully handled command.
#[derive(Debug)]
pub struct AuctionCommandResult {
    /// The aggregate ID affected by the command.
    pub aggregate_id: Uuid,
    /// The auction state after the command.
    pub auction: AuctionView,
    /// The integration events committed to the outbox.
    pub events: Vec<IntegrationEvent>,
}

async fn load_existing(
    store: &dyn AggregateStore<Auction>,
    auction_id: Uuid,
) -> Result<Auction, DomainError> {
    store
        .load(auction_id)
        .await?
        .ok_or(DomainError::AggregateNotFound(auction_id))
}

/// Handles the `CreateAuction` command: validates and lists the auction, then
/// commits it with its `AuctionCreated` event.
///
/// # Errors
///
/// Returns `DomainError::Validation` for invalid input, or the store's error
/// if the commit fails (in which case no event exists).
#[instrument(skip_all, fields(command = command.command_type(), actor = %command.actor(), correlation_id = %command.correlation_id))]
pub async fn handle_create_auction(
    command: &CreateAuction,
    clock: &dyn Clock,
    store: &dyn AggregateStore<Auction>,
) -> Result<AuctionCommandResult, DomainError> {
    let mut auction = Auction::create(
        &command.seller,
        command.item.clone(),
        command.reserve_price,
        command.auction_end,
        command.event_context(),
        clock,
    )?;

    let events = publish_with_mutation(store, Mutation::Create(&auction), clock).await?;
    auction.clear_uncommitted_events();

    info!(auction_id = %auction.id, seller = auction.seller(), "auction created");

    Ok(AuctionCommandResult {
        aggregate_id: auction.id,
        auction: AuctionView::from(&auction),
        events,
    })
}

/// Handles the `UpdateAuction` command: loads the auction, checks that the
/// actor is the seller, applies the item patch and commits it with its
/// `AuctionUpdated` event.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound`, `DomainError::Forbidden`,
/// `DomainError::Validation`, or the store's error on commit failure.
#[instrument(skip_all, fields(command = command.command_type(), actor = %command.actor(), auction_id = %command.auction_id, correlation_id = %command.correlation_id))]
pub async fn handle_update_auction(
    command: &UpdateAuction,
    clock: &dyn Clock,
    store: &dyn AggregateStore<Auction>,
) -> Result<AuctionCommandResult, DomainError> {
    let mut auction = load_existing(store, command.auction_id).await?;
    let expected_version = auction.version();

    auction.update_item(&command.actor, &command.patch, command.event_context(), clock)?;

    let events = publish_with_mutation(
        store,
        Mutation::Update {
            aggregate: &auction,
            expected_version,
        },
        clock,
    )
    .await?;
    auction.clear_uncommitted_events();

    info!(version = auction.version(), "auction updated");

    Ok(AuctionCommandResult {
        aggregate_id: auction.id,
        auction: AuctionView::from(&auction),
        events,
    })
}

/// Handles the `DeleteAuction` command: loads the auction, checks that the
/// actor is the seller and commits the removal with its `AuctionDeleted`
/// event.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound`, `DomainError::Forbidden`, or the
/// store's error on commit failure.
#[instrument(skip_all, fields(command = command.command_type(), actor = %command.actor(), auction_id = %command.auction_id, correlation_id = %command.correlation_id))]
pub async fn handle_delete_auction(
    command: &DeleteAuction,
    clock: &dyn Clock,
    store: &dyn AggregateStore<Auction>,
) -> Result<AuctionCommandResult, DomainError> {
    let mut auction = load_existing(store, command.auction_id).await?;
    let expected_version = auction.version();

    auction.delete(&command.actor, command.event_context(), clock)?;

    let events = publish_with_mutation(
        store,
        Mutation::Delete {
            aggregate: &auction,
            expected_version,
        },
        clock,
    )
    .await?;
    auction.clear_uncommitted_events();

    info!("auction deleted");

    Ok(AuctionCommandResult {
        aggregate_id: auction.id,
        auction: AuctionView::from(&auction),
        events,
    })
}
