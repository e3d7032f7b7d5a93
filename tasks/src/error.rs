use thiserror::Error;

use backend::auth::AuthError;
use backend::store::StoreError;

/// Task operations can fail on either side of the wrapper. Both kinds
/// pass through unchanged; there is no translation layer.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
