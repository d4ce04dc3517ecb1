//! Host application port.
//!
//! A [`HostSurface`] is the only source of modules a script can import. The
//! host lists what it offers and builds each module on demand.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rhai::{Array, Dynamic, EvalAltResult, ImmutableString, Module};

/// Modules the host exposes to scripts.
pub trait HostSurface: Send + Sync {
    /// Names a script may import, before policy filtering.
    fn module_names(&self) -> Vec<String>;

    /// Build the module registered under `name`, or `None` if unknown.
    fn build_module(&self, name: &str) -> Option<Module>;
}

/// A host that offers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyHost;

impl HostSurface for EmptyHost {
    fn module_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn build_module(&self, _name: &str) -> Option<Module> {
        None
    }
}

/// One object in a [`MemoryScene`].
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    pub kind: String,
    pub size: f64,
}

/// In-memory scene exposed as the `scene` module.
///
/// Used by the CLI and tests in place of a real 3D host. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryScene {
    objects: Arc<Mutex<Vec<SceneObject>>>,
}

pub const SCENE_MODULE: &str = "scene";

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

fn lock(objects: &Mutex<Vec<SceneObject>>) -> MutexGuard<'_, Vec<SceneObject>> {
    objects.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Accept both `2` and `2.0` from scripts.
#[allow(clippy::cast_precision_loss)]
fn number(value: &Dynamic) -> ScriptResult<f64> {
    value
        .as_float()
        .or_else(|_| value.as_int().map(|i| i as f64))
        .map_err(|type_name| format!("expected a number, got {type_name}").into())
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the objects in the scene.
    pub fn objects(&self) -> Vec<SceneObject> {
        lock(&self.objects).clone()
    }

    fn add(&self, name: &str, kind: &str, size: f64) -> ScriptResult<ImmutableString> {
        if size <= 0.0 {
            return Err(format!("{kind} size must be positive").into());
        }
        let mut objects = lock(&self.objects);
        if objects.iter().any(|o| o.name == name) {
            return Err(format!("object '{name}' already exists").into());
        }
        objects.push(SceneObject {
            name: name.to_string(),
            kind: kind.to_string(),
            size,
        });
        Ok(name.into())
    }
}

impl HostSurface for MemoryScene {
    fn module_names(&self) -> Vec<String> {
        vec![SCENE_MODULE.to_string()]
    }

    fn build_module(&self, name: &str) -> Option<Module> {
        if name != SCENE_MODULE {
            return None;
        }

        let mut module = Module::new();

        let scene = self.clone();
        module.set_native_fn("add_cube", move |name: ImmutableString, size: Dynamic| -> ScriptResult<ImmutableString> {
            scene.add(&name, "cube", number(&size)?)
        });

        let scene = self.clone();
        module.set_native_fn("add_sphere", move |name: ImmutableString, radius: Dynamic| -> ScriptResult<ImmutableString> {
            scene.add(&name, "sphere", number(&radius)?)
        });

        let scene = self.clone();
        module.set_native_fn("list_objects", move || -> ScriptResult<Array> {
            Ok(lock(&scene.objects)
                .iter()
                .map(|o| Dynamic::from(o.name.clone()))
                .collect::<Array>())
        });

        let scene = self.clone();
        module.set_native_fn("count", move || -> ScriptResult<i64> {
            Ok(i64::try_from(lock(&scene.objects).len()).unwrap_or(i64::MAX))
        });

        let scene = self.clone();
        module.set_native_fn("remove", move |name: ImmutableString| -> ScriptResult<bool> {
            let mut objects = lock(&scene.objects);
            let before = objects.len();
            objects.retain(|o| o.name != name.as_str());
            Ok(objects.len() != before)
        });

        module.build_index();
        Some(module)
    }
}
