//! The loader class and managed archive compiled into this binary.

use anyhow::{bail, Error};

mod embedded {
    include!(concat!(env!("OUT_DIR"), "/embedded_resources.rs"));
}

pub struct Resources {
    pub loader_class: &'static str,
    pub class_bytes: &'static [u8],
    pub archive: &'static [u8],
}

impl Resources {
    pub fn embedded() -> Result<Resources, Error> {
        Resources::from_parts(
            embedded::LOADER_CLASS_NAME,
            embedded::LOADER_CLASS,
            embedded::ARCHIVE,
        )
    }

    fn from_parts(
        loader_class: &'static str,
        class_bytes: Option<&'static [u8]>,
        archive: Option<&'static [u8]>,
    ) -> Result<Resources, Error> {
        let class_bytes = match class_bytes {
            Some(b) if !b.is_empty() => b,
            _ => bail!("no loader class was embedded in this binary"),
        };
        let archive = match archive {
            Some(b) if !b.is_empty() => b,
            _ => bail!("no managed archive was embedded in this binary"),
        };
        Ok(Resources {
            loader_class,
            class_bytes,
            archive,
        })
    }
}
