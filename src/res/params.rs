use std::path::PathBuf;

/// Setup parameters of `Resources`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceParams {
    /// The base directory that relative paths are resolved against. Defaults to the
    /// working directory of current process.
    pub working_dir: Option<PathBuf>,
    /// A manifest file that pre-populates the default manifest if it exists.
    pub default_manifest: Option<PathBuf>,
}

/// Controls what a load request does besides decoding the requested resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFlags {
    /// Loads the resources declared as dependencies as well.
    pub load_dependencies: bool,
    /// Keeps an internal reference, so the resource stays loaded until it is released
    /// or unloaded explicitly.
    pub keep_internal_ref: bool,
    /// Asks the decoder to keep the source data around after decoding.
    pub keep_source_data: bool,
}

impl Default for LoadFlags {
    fn default() -> Self {
        LoadFlags {
            load_dependencies: true,
            keep_internal_ref: true,
            keep_source_data: false,
        }
    }
}

impl LoadFlags {
    /// Loads nothing but the resource itself.
    pub fn none() -> Self {
        LoadFlags {
            load_dependencies: false,
            keep_internal_ref: false,
            keep_source_data: false,
        }
    }

    /// Flags used for the dependencies of a resource loaded with `self`.
    pub(crate) fn for_dependencies(self) -> Self {
        LoadFlags {
            load_dependencies: true,
            keep_internal_ref: false,
            keep_source_data: self.keep_source_data,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_json() {
        let params: ResourceParams = serde_json::from_str(r#"{"working_dir": "/game"}"#).unwrap();
        assert_eq!(params.working_dir, Some(PathBuf::from("/game")));
        assert_eq!(params.default_manifest, None);

        let flags = LoadFlags::default().for_dependencies();
        assert!(flags.load_dependencies);
        assert!(!flags.keep_internal_ref);
    }
}
