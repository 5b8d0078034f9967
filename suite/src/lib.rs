pub mod config;
pub mod descriptor;
pub mod loader;
pub mod registry;
pub mod types;

pub use config::{
    CheckerConfig, ConfigError, ConfigResult, ExitClass, ExitCodePolicy, HarnessConfig,
    ProfileConfig, DEFAULT_CONFIG_FILE, PLUGINS_ENV_VAR, PLUGIN_CONFIG_FILE,
};
pub use descriptor::{parse_descriptor, DescriptorError, DESCRIPTOR_FILE};
pub use loader::{discover, DiscoveryError, DiscoveryResult, FixtureFilter, FixtureLoader};
pub use registry::{
    materialize, plan, profile_command, Plan, PlanError, PlanResult, ProfileRegistry, ProfileSelection,
    UnknownProfileError,
};
pub use types::{CommandSpec, Expectation, Fixture, Invocation, OutcomeKind, Profile};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::descriptor::*;
    pub use crate::loader::*;
    pub use crate::registry::*;
    pub use crate::types::*;
}
