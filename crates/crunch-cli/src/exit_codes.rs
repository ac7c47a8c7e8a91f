//! Process exit codes. Part of the public contract: the cloud parent maps a
//! child's code back onto its own failure.

pub use crunch_core::errors::exit::{
    ADAPTER_ERROR, CONFIG_ERROR, ESCAPE, INTERNAL, LOAD_ERROR, SUCCESS, USER_FAILURE,
};
