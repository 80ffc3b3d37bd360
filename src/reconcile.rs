//! Reconciliation of the remote catalog against the persisted record.
//!
//! Pure set arithmetic: nothing here touches the network or the filesystem,
//! and items are partitioned, never modified.

use std::collections::{BTreeSet, HashSet};

use crate::types::{Item, Order, Platform, PlatformSelector};

/// Partition of the catalog produced by [`reconcile`]
#[derive(Debug, Default, Clone)]
pub struct Reconciliation {
    /// Candidates not yet confirmed present locally
    pub to_fetch: HashSet<Item>,
    /// Previously recorded items no longer anywhere in the catalog
    pub orphaned: HashSet<Item>,
    /// Candidates already confirmed by the prior record
    pub satisfied: HashSet<Item>,
    /// Every item of every order, regardless of window or platform
    pub catalog: HashSet<Item>,
}

/// Expand platform selectors against the tags observed in the catalog.
///
/// `all` is every observed tag, `nogames` every observed tag that is not a
/// game build. Literal tags are used as given, observed or not. Multiple
/// selectors union their expansions.
pub fn resolve_platforms(
    selectors: &[PlatformSelector],
    observed: &BTreeSet<Platform>,
) -> BTreeSet<Platform> {
    let mut resolved = BTreeSet::new();
    for selector in selectors {
        match selector {
            PlatformSelector::Only(platform) => {
                resolved.insert(*platform);
            }
            PlatformSelector::All => resolved.extend(observed.iter().copied()),
            PlatformSelector::NoGames => {
                resolved.extend(observed.iter().copied().filter(|p| !p.is_game()))
            }
        }
    }
    resolved
}

/// Decide what to fetch and what has been orphaned.
///
/// Orders may come in any order; they are sorted by purchase time here. A
/// `purchase_limit` of zero, or one at least as large as the number of orders,
/// considers the whole history. Items that also appear in an order outside
/// the window are never candidates. Only prior items with `verified` set count
/// as present.
pub fn reconcile(
    orders: &[Order],
    prior: &HashSet<Item>,
    purchase_limit: usize,
    selectors: &[PlatformSelector],
) -> Reconciliation {
    let mut sorted: Vec<&Order> = orders.iter().collect();
    sorted.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

    let split = if purchase_limit == 0 {
        0
    } else {
        sorted.len().saturating_sub(purchase_limit)
    };
    let (outside, window) = sorted.split_at(split);

    let catalog: HashSet<Item> = sorted
        .iter()
        .flat_map(|order| order.items.iter().cloned())
        .collect();
    let excluded: HashSet<&Item> = outside.iter().flat_map(|order| order.items.iter()).collect();

    let observed: BTreeSet<Platform> = catalog.iter().map(|item| item.platform).collect();
    let platforms = resolve_platforms(selectors, &observed);
    tracing::debug!(
        orders = sorted.len(),
        window = window.len(),
        platforms = ?platforms,
        "Reconciling catalog"
    );

    let confirmed: HashSet<&Item> = prior.iter().filter(|item| item.verified).collect();

    let mut to_fetch = HashSet::new();
    let mut satisfied = HashSet::new();
    for item in window.iter().flat_map(|order| order.items.iter()) {
        if excluded.contains(item) || !platforms.contains(&item.platform) {
            continue;
        }
        if confirmed.contains(item) {
            satisfied.insert(item.clone());
        } else {
            to_fetch.insert(item.clone());
        }
    }

    let orphaned: HashSet<Item> = prior
        .iter()
        .filter(|item| !catalog.contains(*item))
        .cloned()
        .collect();

    Reconciliation {
        to_fetch,
        orphaned,
        satisfied,
        catalog,
    }
}
