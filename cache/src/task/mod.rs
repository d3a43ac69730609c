//! Background work shared by every map cache: the sweeper that removes
//! expired entries nobody reads anymore.

pub(crate) mod sweeper;
