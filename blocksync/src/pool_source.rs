use async_trait::async_trait;
use collector::SnapshotPoolTracker;
use containers::Height;

/// Where the executor learns the snapshot pool's latest height. Advisory
/// only: implementations return a last-known value rather than failing.
#[async_trait]
pub trait SnapshotPoolSource: Send {
    async fn refresh(&mut self) -> Height;
}

#[async_trait]
impl SnapshotPoolSource for SnapshotPoolTracker {
    async fn refresh(&mut self) -> Height {
        SnapshotPoolTracker::refresh(self).await
    }
}
