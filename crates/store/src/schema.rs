//! Logical table registry.

/// Every logical table in the store. Write transactions declare the subset
/// they may touch; the commit path orders trees by this enum so multi-tree
/// transactions always lock in a consistent order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Accounts,
    Blocks,
    Pending,
    ConfirmationHeight,
    Unchecked,
    Frontiers,
    Vote,
    OnlineWeight,
    Peers,
    Meta,
    // Legacy tables kept only so schema upgrades can drain them.
    SendBlocks,
    ReceiveBlocks,
    OpenBlocks,
    ChangeBlocks,
    StateBlocks,
    Representation,
}

impl Table {
    pub const ALL: [Table; 16] = [
        Table::Accounts,
        Table::Blocks,
        Table::Pending,
        Table::ConfirmationHeight,
        Table::Unchecked,
        Table::Frontiers,
        Table::Vote,
        Table::OnlineWeight,
        Table::Peers,
        Table::Meta,
        Table::SendBlocks,
        Table::ReceiveBlocks,
        Table::OpenBlocks,
        Table::ChangeBlocks,
        Table::StateBlocks,
        Table::Representation,
    ];

    pub(crate) fn tree_name(self) -> &'static str {
        match self {
            Table::Accounts => "accounts",
            Table::Blocks => "blocks",
            Table::Pending => "pending",
            Table::ConfirmationHeight => "confirmation_height",
            Table::Unchecked => "unchecked",
            Table::Frontiers => "frontiers",
            Table::Vote => "vote",
            Table::OnlineWeight => "online_weight",
            Table::Peers => "peers",
            Table::Meta => "meta",
            Table::SendBlocks => "send_blocks",
            Table::ReceiveBlocks => "receive_blocks",
            Table::OpenBlocks => "open_blocks",
            Table::ChangeBlocks => "change_blocks",
            Table::StateBlocks => "state_blocks",
            Table::Representation => "representation",
        }
    }

    pub(crate) fn index(self) -> usize {
        Table::ALL
            .iter()
            .position(|t| *t == self)
            .expect("table registered in ALL")
    }
}
