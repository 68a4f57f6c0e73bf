mod environment;
pub use environment::{
    DEFAULT_FILE_MODE, DEFAULT_MAP_SIZE, Environment, EnvironmentBuilder, Info, Stat, WriteWait,
};

pub(crate) mod handles;
