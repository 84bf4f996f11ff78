pub(crate) use anyhow::{Context as _, Error, Result, anyhow, bail};
pub(crate) use tracing::{debug, error, info, trace, warn};
