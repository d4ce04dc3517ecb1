//! Import enforcement.
//!
//! Static analysis can miss an import; this resolver cannot. Every `import`
//! a script executes goes through it, and it only hands out modules that
//! the policy allows and the host provides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use meshmate_core::ScriptPolicy;
use rhai::{Dynamic, Engine, EvalAltResult, Module, ModuleResolver, Position};

use crate::host::HostSurface;

pub struct HostModuleResolver {
    policy: ScriptPolicy,
    host: Arc<dyn HostSurface>,
    built: Mutex<HashMap<String, Arc<Module>>>,
}

impl HostModuleResolver {
    pub fn new(policy: ScriptPolicy, host: Arc<dyn HostSurface>) -> Self {
        Self {
            policy,
            host,
            built: Mutex::new(HashMap::new()),
        }
    }

    /// Host modules a script may actually import.
    pub fn importable(&self) -> Vec<String> {
        self.host
            .module_names()
            .into_iter()
            .filter(|name| self.policy.is_allowed(name))
            .collect()
    }
}

impl ModuleResolver for HostModuleResolver {
    fn resolve(
        &self,
        _engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Arc<Module>, Box<EvalAltResult>> {
        if !self.policy.is_allowed(path) {
            tracing::warn!(module = %path, "Script import refused by policy");
            return Err(EvalAltResult::ErrorRuntime(
                Dynamic::from(format!("import of '{path}' is not permitted")),
                pos,
            )
            .into());
        }

        let mut built = self.built.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(module) = built.get(path) {
            return Ok(module.clone());
        }

        let module = self
            .host
            .build_module(path)
            .map(Arc::new)
            .ok_or_else(|| EvalAltResult::ErrorModuleNotFound(path.to_string(), pos))?;
        tracing::debug!(module = %path, "Host module resolved");
        built.insert(path.to_string(), module.clone());
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryScene;

    fn resolver() -> HostModuleResolver {
        HostModuleResolver::new(ScriptPolicy::default(), Arc::new(MemoryScene::new()))
    }

    #[test]
    fn test_resolves_allowed_host_module() {
        let engine = Engine::new_raw();
        let resolver = resolver();
        let first = resolver.resolve(&engine, None, "scene", Position::NONE).unwrap();
        let second = resolver.resolve(&engine, None, "scene", Position::NONE).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.importable(), ["scene"]);
    }

    #[test]
    fn test_refuses_restricted_and_unprovided() {
        let engine = Engine::new_raw();
        let resolver = resolver();

        let refused = resolver
            .resolve(&engine, None, "os", Position::NONE)
            .unwrap_err();
        assert!(refused.to_string().contains("not permitted"));

        // Allowed by policy but not offered by the host.
        let missing = resolver
            .resolve(&engine, None, "math", Position::NONE)
            .unwrap_err();
        assert!(matches!(*missing, EvalAltResult::ErrorModuleNotFound(..)));
    }
}
