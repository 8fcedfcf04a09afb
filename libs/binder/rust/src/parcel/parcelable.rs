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

use super::Parcel;
use crate::error::{Result, StatusCode};
use crate::proxy::SpIBinder;

/// A struct whose instances can be written to a [`Parcel`].
// Might be able to hook this up as a serde backend in the future?
pub trait Serialize {
    /// Serialize this instance into the given [`Parcel`].
    fn serialize(&self, parcel: &mut Parcel) -> Result<()>;
}

/// A struct whose instances can be restored from a [`Parcel`].
pub trait Deserialize: Sized {
    /// Deserialize an instance from the given [`Parcel`].
    fn deserialize(parcel: &Parcel) -> Result<Self>;
}

macro_rules! parcelable_primitives {
    {
        $(
            impl $trait:ident for $ty:ty = $fn:ident;
        )*
    } => {
        $(impl_parcelable!{$trait, $ty, $fn})*
    };
}

macro_rules! impl_parcelable {
    {Serialize, $ty:ty, $write_fn:ident} => {
        impl Serialize for $ty {
            fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
                parcel.$write_fn(*self)
            }
        }
    };

    {Deserialize, $ty:ty, $read_fn:ident} => {
        impl Deserialize for $ty {
            fn deserialize(parcel: &Parcel) -> Result<Self> {
                parcel.$read_fn()
            }
        }
    };
}

parcelable_primitives! {
    impl Serialize for bool = write_bool;
    impl Deserialize for bool = read_bool;

    impl Serialize for i32 = write_i32;
    impl Deserialize for i32 = read_i32;

    impl Serialize for u32 = write_u32;
    impl Deserialize for u32 = read_u32;

    impl Serialize for i64 = write_i64;
    impl Deserialize for i64 = read_i64;

    impl Serialize for u64 = write_u64;
    impl Deserialize for u64 = read_u64;
}

impl<T: Serialize + ?Sized> Serialize for &T {
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        (**self).serialize(parcel)
    }
}

impl Serialize for str {
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_string16(self)
    }
}

impl Serialize for String {
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_string16(self)
    }
}

impl Serialize for Option<String> {
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_nullable_string16(self.as_deref())
    }
}

impl Deserialize for Option<String> {
    fn deserialize(parcel: &Parcel) -> Result<Self> {
        parcel.read_string16()
    }
}

impl Deserialize for String {
    fn deserialize(parcel: &Parcel) -> Result<Self> {
        parcel.read_string16()?.ok_or(StatusCode::UNEXPECTED_NULL)
    }
}

impl<T: Serialize> Serialize for [T] {
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        let len: i32 = self.len().try_into().or(Err(StatusCode::BAD_VALUE))?;
        parcel.write_i32(len)?;
        self.iter().try_for_each(|item| item.serialize(parcel))
    }
}

impl<T: Serialize> Serialize for Vec<T> {
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        self[..].serialize(parcel)
    }
}

impl<T: Deserialize> Deserialize for Vec<T> {
    fn deserialize(parcel: &Parcel) -> Result<Self> {
        let len: usize = parcel
            .read_i32()?
            .try_into()
            .or(Err(StatusCode::UNEXPECTED_NULL))?;
        // No element takes less than four bytes, so a length the parcel
        // cannot hold is rejected before allocating.
        if len > parcel.data_avail() / 4 {
            return Err(StatusCode::NOT_ENOUGH_DATA);
        }
        (0..len).map(|_| T::deserialize(parcel)).collect()
    }
}

impl Serialize for SpIBinder {
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_binder(Some(self))
    }
}

impl Serialize for Option<SpIBinder> {
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_binder(self.as_ref())
    }
}

impl Deserialize for SpIBinder {
    fn deserialize(parcel: &Parcel) -> Result<Self> {
        parcel.read_binder()?.ok_or(StatusCode::UNEXPECTED_NULL)
    }
}

impl Deserialize for Option<SpIBinder> {
    fn deserialize(parcel: &Parcel) -> Result<Self> {
        parcel.read_binder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_read_and_write() {
        let mut parcel = Parcel::new();
        parcel.write(&42i32).unwrap();
        parcel.write("binder_Demo").unwrap();
        parcel.write(&(None as Option<String>)).unwrap();
        parcel.write(&vec![1, 2, 3]).unwrap();
        parcel.write(&(None as Option<SpIBinder>)).unwrap();

        assert_eq!(parcel.read::<i32>(), Ok(42));
        assert_eq!(parcel.read::<String>(), Ok("binder_Demo".to_string()));
        assert_eq!(parcel.read::<Option<String>>(), Ok(None));
        assert_eq!(parcel.read::<Vec<i32>>(), Ok(vec![1, 2, 3]));
        assert_eq!(parcel.read::<Option<SpIBinder>>(), Ok(None));
    }

    #[test]
    fn string_lists() {
        let names = vec!["binder_Demo".to_string(), String::new()];
        let mut parcel = Parcel::new();
        parcel.write(&names).unwrap();
        assert_eq!(parcel.read::<Vec<String>>(), Ok(names));
        assert_eq!(parcel.data_avail(), 0);
    }

    #[test]
    fn null_where_value_required() {
        let mut parcel = Parcel::new();
        parcel.write(&(None as Option<String>)).unwrap();
        parcel.write(&(None as Option<SpIBinder>)).unwrap();

        assert_eq!(parcel.read::<String>(), Err(StatusCode::UNEXPECTED_NULL));
        assert_eq!(parcel.read::<SpIBinder>(), Err(StatusCode::UNEXPECTED_NULL));
    }

    #[test]
    fn oversized_vector_length_is_rejected() {
        let mut parcel = Parcel::new();
        parcel.write(&1000i32).unwrap();
        parcel.write(&1i32).unwrap();
        assert_eq!(parcel.read::<Vec<i32>>(), Err(StatusCode::NOT_ENOUGH_DATA));
    }
}
