mod chain;
mod collab;
mod content_store;
mod fs_utils;
mod journal;
mod labels;
mod layout;
mod lock;
mod mounts;
mod probation;
mod properties;
mod recovery;
mod snapshot;
mod tree;
mod workflow;
mod writeable;

pub use chain::{SystemVersionChain, SYSTEM_HASH_KEY};
pub use collab::{
    app_config_node, BindingsLoader, Collaborators, CommandBindingsLoader, CommandHookRunner,
    ConfigStore, FileConfigStore, FilePrincipals, HookRunner, InstallEvents, NullSupervisor,
    Principals, Supervisor, TracingEvents, SYSTEM_TREE,
};
pub use content_store::ContentStore;
pub use journal::{Journal, PendingOperation};
pub use labels::PermissionPropagator;
pub use layout::{HookKind, UpdateLayout};
pub use lock::UpdateLock;
pub use mounts::{lazy_unmount, MountInfo, MountTable};
pub use probation::{FileProbation, Probation};
pub use recovery::{RecoveryReport, RecoveryScanner};
pub use snapshot::{copy_tree, SnapshotEngine, SnapshotOutcome};
pub use tree::{walk, EntryKind, TreeEntry, TreeVisitor, WalkControl, WalkOptions};
pub use workflow::{
    AppSummary, EngineSummary, GcReport, PendingSummary, SystemSummary, UpdateEngine,
};
pub use writeable::{install_writeable_files, reconcile_writeable_files, stage_writeable_files};
