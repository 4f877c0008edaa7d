//! Typed, priority-checked access to one chroot group of a keyfile.

use crate::config::keyfile::{parse_bool, split_list, Keyfile, Priority};
use crate::config::types::{ChrootError, ChrootResult};
use std::path::{Path, PathBuf};

/// Reader over the keys of a single keyfile group
///
/// Conversion failures are reported as [`ChrootError::Key`], carrying the
/// group, key and line of the offending entry.
#[derive(Clone, Copy)]
pub struct KeyReader<'a> {
    keyfile: &'a Keyfile,
    group: &'a str,
}

impl<'a> KeyReader<'a> {
    pub fn new(keyfile: &'a Keyfile, group: &'a str) -> Self {
        Self { keyfile, group }
    }

    pub fn keyfile(&self) -> &'a Keyfile {
        self.keyfile
    }

    pub fn group(&self) -> &'a str {
        self.group
    }

    /// Keys present in the group, in file order
    pub fn keys(&self) -> Vec<&'a str> {
        self.keyfile.keys(self.group)
    }

    /// Attach the key's position to a conversion error
    pub fn wrap(&self, key: &str, source: ChrootError) -> ChrootError {
        ChrootError::Key {
            pos: self.keyfile.position(self.group, Some(key)),
            group: self.group.to_string(),
            key: key.to_string(),
            source: Box::new(source),
        }
    }

    pub fn raw(&self, key: &str, priority: Priority) -> ChrootResult<Option<&'a str>> {
        Ok(self.keyfile.get_checked(self.group, key, priority)?)
    }

    pub fn string(&self, key: &str, priority: Priority) -> ChrootResult<Option<String>> {
        Ok(self.raw(key, priority)?.map(str::to_string))
    }

    pub fn bool(&self, key: &str, priority: Priority) -> ChrootResult<Option<bool>> {
        match self.raw(key, priority)? {
            None => Ok(None),
            Some(value) => parse_bool(value)
                .map(Some)
                .ok_or_else(|| self.keyfile.invalid_value(self.group, key, value).into()),
        }
    }

    pub fn list(&self, key: &str, priority: Priority) -> ChrootResult<Option<Vec<String>>> {
        Ok(self.raw(key, priority)?.map(split_list))
    }

    /// Convert a value with `parse`, wrapping its error with the key position
    pub fn parse<T, F>(&self, key: &str, priority: Priority, parse: F) -> ChrootResult<Option<T>>
    where
        F: FnOnce(&str) -> ChrootResult<T>,
    {
        match self.raw(key, priority)? {
            None => Ok(None),
            Some(value) => parse(value).map(Some).map_err(|e| self.wrap(key, e)),
        }
    }

    /// Read an absolute path; relative paths fail with `not_absolute`
    pub fn absolute_path(
        &self,
        key: &str,
        priority: Priority,
        not_absolute: fn(String) -> ChrootError,
    ) -> ChrootResult<Option<PathBuf>> {
        self.parse(key, priority, |value| absolute(value, not_absolute))
    }
}

/// Validate that `value` is an absolute path
pub fn absolute(value: &str, not_absolute: fn(String) -> ChrootError) -> ChrootResult<PathBuf> {
    let path = Path::new(value);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Err(not_absolute(value.to_string()))
    }
}

/// Render an optional path for a keyfile or environment value
pub fn path_string(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_conversion_errors_with_position() {
        let kf = Keyfile::parse("[sid]\ndevice=dev/sda1\n", Some(Path::new("c.conf"))).unwrap();
        let reader = KeyReader::new(&kf, "sid");
        let err = reader
            .absolute_path("device", Priority::Required, ChrootError::DeviceAbs)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "c.conf:2: [sid]: device: dev/sda1: device must have an absolute path"
        );
    }

    #[test]
    fn missing_required_key_is_keyfile_error() {
        let kf = Keyfile::parse("[sid]\n", None).unwrap();
        let reader = KeyReader::new(&kf, "sid");
        assert!(matches!(
            reader.string("type", Priority::Required),
            Err(ChrootError::Keyfile(_))
        ));
    }
}
