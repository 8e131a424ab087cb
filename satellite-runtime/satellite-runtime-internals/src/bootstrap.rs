//! Bootstrapping the loader object from resources embedded in the host.

use crate::embedding::{JValue, Receiver, Ref, ReturnType};
use crate::error::Error;
use crate::fault::Checked;
use crate::vm::VmInstance;

/// Static factory the loader class must provide.
pub const FACTORY_NAME: &str = "createBootstrap";
pub const FACTORY_DESCRIPTOR: &str = "([B)Ljava/lang/Object;";

/// A global reference to the bootstrapped loader object.
#[derive(Debug, PartialEq, Eq)]
pub struct LoaderHandle {
    obj: Ref,
}

impl LoaderHandle {
    pub fn object(&self) -> Ref {
        self.obj
    }
}

/// Define the class `class_name` in the runtime from its bytes.
pub fn inject_resource(
    instance: &VmInstance,
    class_name: &str,
    bytes: &[u8],
) -> Result<Ref, Error> {
    if bytes.is_empty() {
        bail_bootstrap!("resource for class {} is empty", class_name);
    }
    let env = instance.env()?;
    let checked = Checked::new(&*env);
    match checked.define_class(class_name, bytes) {
        Some(class) => {
            tracing::debug!("defined class {} ({} bytes)", class_name, bytes.len());
            Ok(class)
        }
        None => {
            tracing::error!("Cannot define class {}", class_name);
            bail_bootstrap!("cannot define class {}", class_name);
        }
    }
}

/// Copy `bytes` into a new managed byte array.
pub fn inject_archive(instance: &VmInstance, bytes: &[u8]) -> Result<Ref, Error> {
    if bytes.is_empty() {
        bail_bootstrap!("archive is empty");
    }
    let env = instance.env()?;
    let checked = Checked::new(&*env);
    checked.new_byte_array(bytes).ok_or_else(|| {
        Error::BootstrapFailure(format!("cannot allocate {} byte array", bytes.len()))
    })
}

/// Define the loader class, hand it the archive and keep the object its factory returns.
///
/// The loader reference is stored in `instance` and also returned for convenience.
pub fn bootstrap(
    instance: &mut VmInstance,
    loader_class: &str,
    class_bytes: &[u8],
    archive_bytes: &[u8],
) -> Result<Ref, Error> {
    if instance.loader.is_some() {
        bail_bootstrap!("loader already bootstrapped");
    }
    if class_bytes.is_empty() || archive_bytes.is_empty() {
        bail_bootstrap!("embedded resources are empty");
    }
    let class = inject_resource(instance, loader_class, class_bytes)?;
    let env = instance.env()?;
    let archive = match inject_archive(instance, archive_bytes) {
        Ok(archive) => archive,
        Err(e) => {
            env.delete_local_ref(class);
            return Err(e);
        }
    };

    let checked = Checked::new(&*env);
    let loader = checked
        .method_id(class, FACTORY_NAME, FACTORY_DESCRIPTOR, true)
        .map(|factory| {
            checked
                .call(
                    Receiver::Static(class),
                    factory,
                    ReturnType::Object,
                    &[JValue::from(archive)],
                )
                .and_then(|v| v.as_object())
        });
    env.delete_local_ref(archive);
    env.delete_local_ref(class);
    let loader = match loader {
        Some(loader) => loader,
        None => {
            tracing::error!("Cannot find loader factory {}", FACTORY_NAME);
            bail_bootstrap!("loader class has no {}{}", FACTORY_NAME, FACTORY_DESCRIPTOR);
        }
    };
    let loader = match loader {
        Some(obj) => obj,
        None => {
            tracing::error!("Cannot create loader instance");
            bail_bootstrap!("loader factory failed");
        }
    };
    let global = checked.new_global_ref(loader);
    env.delete_local_ref(loader);
    let global = global.ok_or_else(|| {
        Error::BootstrapFailure("cannot keep a reference to the loader".to_owned())
    })?;
    tracing::debug!("loader bootstrapped");
    instance.loader = Some(LoaderHandle { obj: global });
    Ok(global)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::mock::{MethodBehavior, MockObject, MockRuntimeBuilder, ARCHIVE_MAGIC};
    use crate::test_helpers::test_ex;
    use crate::vm::VmFactory;

    const CLASS: &[u8] = b"\xca\xfe\xba\xbe";

    fn archive() -> Vec<u8> {
        let mut bytes = ARCHIVE_MAGIC.to_vec();
        bytes.extend_from_slice(b"rest of the archive");
        bytes
    }

    #[test]
    fn archive_bytes_arrive_intact() {
        test_ex(|| {
            let runtime = MockRuntimeBuilder::new().build();
            let instance = VmFactory::new(runtime.clone()).create(&[]).expect("instance");
            let bytes = archive();
            let array = inject_archive(&instance, &bytes).expect("array");
            assert_eq!(runtime.object(array), Some(MockObject::Bytes(bytes)));
        })
    }

    #[test]
    fn bootstrap_keeps_a_global_reference() {
        test_ex(|| {
            let runtime = MockRuntimeBuilder::new().build();
            let mut instance = VmFactory::new(runtime.clone()).create(&[]).expect("instance");
            let loader = bootstrap(&mut instance, "satellite/Loader", CLASS, &archive())
                .expect("bootstrap succeeds");
            assert_eq!(runtime.object(loader), Some(MockObject::Loader));
            assert_eq!(instance.loader().map(LoaderHandle::object), Some(loader));
            assert_eq!(runtime.live_global_refs(), 1);
        })
    }

    #[test]
    fn factory_fault_is_cleared_before_failing() {
        test_ex(|| {
            let runtime = MockRuntimeBuilder::new().build();
            let mut instance = VmFactory::new(runtime.clone()).create(&[]).expect("instance");
            let res = bootstrap(&mut instance, "satellite/Loader", CLASS, b"not a zip");
            assert!(matches!(res, Err(Error::BootstrapFailure(_))));
            assert!(!runtime.fault_pending());
            assert_eq!(runtime.faults_described(), 1);
            assert!(instance.loader().is_none());
        })
    }

    #[test]
    fn missing_factory_drops_its_local_references() {
        test_ex(|| {
            let runtime = MockRuntimeBuilder::new()
                .with_method(FACTORY_NAME, MethodBehavior::Missing)
                .build();
            let mut instance = VmFactory::new(runtime.clone()).create(&[]).expect("instance");
            let res = bootstrap(&mut instance, "satellite/Loader", CLASS, &archive());
            assert!(matches!(res, Err(Error::BootstrapFailure(_))));
            assert!(!runtime.fault_pending());
            let class = runtime.class_ref("satellite/Loader").expect("class defined");
            assert!(runtime.local_ref_deleted(class));
            assert!(runtime.calls().is_empty());
        })
    }

    #[test]
    fn loader_class_reference_is_not_kept() {
        test_ex(|| {
            let runtime = MockRuntimeBuilder::new().build();
            let mut instance = VmFactory::new(runtime.clone()).create(&[]).expect("instance");
            let loader = bootstrap(&mut instance, "satellite/Loader", CLASS, &archive())
                .expect("bootstrap succeeds");
            let class = runtime.class_ref("satellite/Loader").expect("class defined");
            assert!(runtime.local_ref_deleted(class));
            assert!(runtime.local_ref_deleted(loader));
            assert_eq!(runtime.live_global_refs(), 1);
        })
    }

    #[test]
    fn rejected_class_is_a_bootstrap_failure() {
        test_ex(|| {
            let runtime = MockRuntimeBuilder::new().with_class_rejection().build();
            let mut instance = VmFactory::new(runtime.clone()).create(&[]).expect("instance");
            let res = bootstrap(&mut instance, "satellite/Loader", CLASS, &archive());
            assert!(matches!(res, Err(Error::BootstrapFailure(_))));
            assert!(!runtime.fault_pending());
        })
    }

    #[test]
    fn empty_resources_fail_without_calling_in() {
        test_ex(|| {
            let runtime = MockRuntimeBuilder::new().build();
            let mut instance = VmFactory::new(runtime.clone()).create(&[]).expect("instance");
            assert!(matches!(
                bootstrap(&mut instance, "satellite/Loader", CLASS, &[]),
                Err(Error::BootstrapFailure(_))
            ));
            assert!(matches!(
                bootstrap(&mut instance, "satellite/Loader", &[], &archive()),
                Err(Error::BootstrapFailure(_))
            ));
            assert!(runtime.calls().is_empty());
            assert_eq!(runtime.faults_described(), 0);
        })
    }
}
