/*
 * Copyright (C) 2020 The Android Open Source Project
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::result;

use thiserror::Error;

/// Low-level status code carried in transaction replies.
#[allow(non_camel_case_types)]
pub type status_t = i32;

/// Error codes of the binder core.
///
/// All error codes are negative integer values, derived from the errno values
/// the kernel driver reports for the same conditions.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[repr(i32)]
pub enum StatusCode {
    #[error("ok")]
    OK = 0,
    #[error("unknown error")]
    UNKNOWN_ERROR = i32::MIN,
    #[error("out of memory")]
    NO_MEMORY = -libc::ENOMEM,
    /// Operation not valid for this object, e.g. a death link on a local
    /// binder.
    #[error("invalid operation")]
    INVALID_OPERATION = -libc::ENOSYS,
    #[error("bad value")]
    BAD_VALUE = -libc::EINVAL,
    /// The interface descriptor of an object differs from the one expected.
    #[error("bad type")]
    BAD_TYPE = i32::MIN + 1,
    #[error("name not found")]
    NAME_NOT_FOUND = -libc::ENOENT,
    #[error("permission denied")]
    PERMISSION_DENIED = -libc::EPERM,
    #[error("not initialized")]
    NO_INIT = -libc::ENODEV,
    #[error("already exists")]
    ALREADY_EXISTS = -libc::EEXIST,
    /// The process hosting the target object is gone, or the handle is not
    /// valid.
    #[error("dead object")]
    DEAD_OBJECT = -libc::EPIPE,
    /// The transport failed to carry the transaction.
    #[error("failed transaction")]
    FAILED_TRANSACTION = i32::MIN + 2,
    #[error("bad index")]
    BAD_INDEX = -libc::EOVERFLOW,
    /// A read asked for more bytes than remain in the parcel.
    #[error("not enough data")]
    NOT_ENOUGH_DATA = -libc::ENODATA,
    #[error("would block")]
    WOULD_BLOCK = -libc::EWOULDBLOCK,
    #[error("timed out")]
    TIMED_OUT = -libc::ETIMEDOUT,
    /// The target does not understand the transaction code, or the interface
    /// token does not match.
    #[error("unknown transaction")]
    UNKNOWN_TRANSACTION = -libc::EBADMSG,
    #[error("unexpected null")]
    UNEXPECTED_NULL = i32::MIN + 8,
}

/// A specialized [`Result`](result::Result) for binder operations.
pub type Result<T> = result::Result<T, StatusCode>;

/// Convert a low-level [`status_t`] code to the idiomatic Rust result type.
pub fn status_result(status: status_t) -> Result<()> {
    match parse_status_code(status) {
        StatusCode::OK => Ok(()),
        e => Err(e),
    }
}

fn parse_status_code(code: status_t) -> StatusCode {
    match code {
        e if e == StatusCode::OK as status_t => StatusCode::OK,
        e if e == StatusCode::NO_MEMORY as status_t => StatusCode::NO_MEMORY,
        e if e == StatusCode::INVALID_OPERATION as status_t => StatusCode::INVALID_OPERATION,
        e if e == StatusCode::BAD_VALUE as status_t => StatusCode::BAD_VALUE,
        e if e == StatusCode::BAD_TYPE as status_t => StatusCode::BAD_TYPE,
        e if e == StatusCode::NAME_NOT_FOUND as status_t => StatusCode::NAME_NOT_FOUND,
        e if e == StatusCode::PERMISSION_DENIED as status_t => StatusCode::PERMISSION_DENIED,
        e if e == StatusCode::NO_INIT as status_t => StatusCode::NO_INIT,
        e if e == StatusCode::ALREADY_EXISTS as status_t => StatusCode::ALREADY_EXISTS,
        e if e == StatusCode::DEAD_OBJECT as status_t => StatusCode::DEAD_OBJECT,
        e if e == StatusCode::FAILED_TRANSACTION as status_t => StatusCode::FAILED_TRANSACTION,
        e if e == StatusCode::BAD_INDEX as status_t => StatusCode::BAD_INDEX,
        e if e == StatusCode::NOT_ENOUGH_DATA as status_t => StatusCode::NOT_ENOUGH_DATA,
        e if e == StatusCode::WOULD_BLOCK as status_t => StatusCode::WOULD_BLOCK,
        e if e == StatusCode::TIMED_OUT as status_t => StatusCode::TIMED_OUT,
        e if e == StatusCode::UNKNOWN_TRANSACTION as status_t => StatusCode::UNKNOWN_TRANSACTION,
        e if e == StatusCode::UNEXPECTED_NULL as status_t => StatusCode::UNEXPECTED_NULL,
        _ => StatusCode::UNKNOWN_ERROR,
    }
}

impl From<StatusCode> for status_t {
    fn from(code: StatusCode) -> status_t {
        code as status_t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_survive_the_wire() {
        for code in [
            StatusCode::DEAD_OBJECT,
            StatusCode::UNKNOWN_TRANSACTION,
            StatusCode::NOT_ENOUGH_DATA,
            StatusCode::BAD_TYPE,
            StatusCode::FAILED_TRANSACTION,
        ] {
            assert_eq!(status_result(code.into()), Err(code));
        }
        assert_eq!(status_result(0), Ok(()));
    }

    #[test]
    fn unrecognized_status_is_unknown_error() {
        assert_eq!(status_result(-4242), Err(StatusCode::UNKNOWN_ERROR));
    }
}
