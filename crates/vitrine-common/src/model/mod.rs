pub mod event;
pub mod exhibit;
pub mod runtime_info;

pub use event::{EventType, LifecycleEvent, StartingStep, StartingStepEvent};
pub use exhibit::{
    Exhibit, ExhibitView, Livecheck, LivecheckKind, Object, ObjectView, Volume, VolumeDriver,
};
pub use runtime_info::{ExhibitStatus, RuntimeInfo};
