//! Macro repositories
//!
//! Macros referenced by symbol (`@name`, RUN) resolve through an ordered
//! chain: the local symbol table first, then every registered
//! repository. The first hit wins; when nothing answers the lookup the
//! macro is unknown. Resolution happens at call time, never at compile
//! time, so mutually recursive macros hold only names and never form
//! owned cycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::macros::Macro;
use super::stack::MemoryStack;

/// A source of macros looked up by symbolic name. Implementations must
/// be shareable across stacks; remote repositories (fleet, extension
/// resolvers) live outside this crate and plug in through this trait.
pub trait MacroRepository: Send + Sync {
    fn find(&self, stack: &MemoryStack, symbol: &str) -> Option<Arc<Macro>>;
}

/// In-process repository backed by a plain map, the first link of the
/// chain after the symbol table.
pub struct InProcessRepository {
    macros: Mutex<HashMap<String, Arc<Macro>>>,
}

impl InProcessRepository {
    pub fn new() -> Self {
        InProcessRepository {
            macros: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, symbol: impl Into<String>, body: Arc<Macro>) {
        let mut macros = self.macros.lock().unwrap_or_else(|p| p.into_inner());
        macros.insert(symbol.into(), body);
    }

    pub fn remove(&self, symbol: &str) {
        let mut macros = self.macros.lock().unwrap_or_else(|p| p.into_inner());
        macros.remove(symbol);
    }

    pub fn len(&self) -> usize {
        self.macros.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InProcessRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroRepository for InProcessRepository {
    fn find(&self, _stack: &MemoryStack, symbol: &str) -> Option<Arc<Macro>> {
        let macros = self.macros.lock().unwrap_or_else(|p| p.into_inner());
        macros.get(symbol).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::script::library::FunctionLibrary;

    #[test]
    fn test_in_process_repository_lookup() {
        let repo = InProcessRepository::new();
        assert!(repo.is_empty());
        repo.register("trend", Arc::new(Macro::new()));
        assert_eq!(repo.len(), 1);

        let stack = MemoryStack::new(
            None,
            None,
            &StackConfig::default(),
            Arc::new(FunctionLibrary::new()),
        );
        assert!(repo.find(&stack, "trend").is_some());
        assert!(repo.find(&stack, "other").is_none());

        repo.remove("trend");
        assert!(repo.find(&stack, "trend").is_none());
    }
}
