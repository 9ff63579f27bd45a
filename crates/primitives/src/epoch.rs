//! Ledger-wide account versioning.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{Account, Link};

/// Account-chain version. New epochs are introduced by special state blocks
/// signed by a designated epoch signer.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum Epoch {
    Unspecified = 0,
    #[default]
    Epoch0 = 1,
    Epoch1 = 2,
    Epoch2 = 3,
}

impl Epoch {
    pub const MAX: Epoch = Epoch::Epoch2;

    /// Zero-based index for per-epoch array lookups.
    pub fn as_index(self) -> usize {
        (u8::from(self) as usize).saturating_sub(Epoch::Epoch0 as usize)
    }

    /// The next epoch, if any.
    pub fn successor(self) -> Option<Epoch> {
        Epoch::try_from(u8::from(self) + 1).ok()
    }

    /// Whether upgrading `from` to `to` advances by exactly one epoch.
    pub fn is_sequential(from: Epoch, to: Epoch) -> bool {
        from >= Epoch::Epoch0 && Some(to) == from.successor()
    }
}

/// The signer and link marker designated for one epoch upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochInfo {
    pub signer: Account,
    pub link: Link,
}

/// Registry of configured epoch upgrades.
#[derive(Debug, Clone, Default)]
pub struct Epochs {
    entries: Vec<(Epoch, EpochInfo)>,
}

impl Epochs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, epoch: Epoch, signer: Account, link: Link) {
        debug_assert!(!self.entries.iter().any(|(e, _)| *e == epoch));
        self.entries.push((epoch, EpochInfo { signer, link }));
    }

    pub fn is_epoch_link(&self, link: &Link) -> bool {
        self.entries.iter().any(|(_, info)| info.link == *link)
    }

    pub fn signer(&self, link: &Link) -> Option<Account> {
        self.entries
            .iter()
            .find(|(_, info)| info.link == *link)
            .map(|(_, info)| info.signer)
    }

    pub fn epoch(&self, link: &Link) -> Option<Epoch> {
        self.entries
            .iter()
            .find(|(_, info)| info.link == *link)
            .map(|(epoch, _)| *epoch)
    }

    pub fn link(&self, epoch: Epoch) -> Option<Link> {
        self.entries
            .iter()
            .find(|(e, _)| *e == epoch)
            .map(|(_, info)| info.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_upgrades() {
        assert!(Epoch::is_sequential(Epoch::Epoch0, Epoch::Epoch1));
        assert!(Epoch::is_sequential(Epoch::Epoch1, Epoch::Epoch2));
        assert!(!Epoch::is_sequential(Epoch::Epoch0, Epoch::Epoch2));
        assert!(!Epoch::is_sequential(Epoch::Epoch1, Epoch::Epoch1));
        assert!(!Epoch::is_sequential(Epoch::Unspecified, Epoch::Epoch0));
    }

    #[test]
    fn registry_lookup() {
        let signer = Account::from_bytes([9u8; 32]);
        let link = Link::from_bytes([1u8; 32]);
        let mut epochs = Epochs::new();
        epochs.add(Epoch::Epoch1, signer, link);
        assert!(epochs.is_epoch_link(&link));
        assert_eq!(epochs.signer(&link), Some(signer));
        assert_eq!(epochs.epoch(&link), Some(Epoch::Epoch1));
        assert_eq!(epochs.link(Epoch::Epoch1), Some(link));
        assert!(!epochs.is_epoch_link(&Link::from_bytes([2u8; 32])));
    }
}
