// src/transact/enabled.rs

/// Capability a stateful holder implements to take part in transactions
///
/// `snapshot` must capture everything `restore` needs to put the holder back
/// exactly as it was; registries return a deep copy of their records and
/// dependency graph.
pub trait TransactEnabled {
    type Snapshot: Send + 'static;

    /// Name the holder's transaction stack is keyed by
    fn holder_name(&self) -> &'static str;

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: Self::Snapshot);
}
