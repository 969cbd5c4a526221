//! The QuartzScript stack machine
//!
//! `MemoryStack` owns the value stack with its hide/show windowing, the
//! symbol table, the register file, the attribute map, the redefinition
//! table, and the budget counters. Macro execution and signal handling
//! live here; the streaming parser is in the sibling `parser` module and
//! operates on the same struct.
//!
//! A stack is driven by a single thread. The pieces that other threads
//! may touch (signal slot, shared budget counters, attribute map) sit
//! behind their own synchronization so substacks and the registry can
//! reach them.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::config::StackConfig;
use crate::metrics;

use super::audit::AuditStatement;
use super::error::{Result, ScriptError};
use super::library::{FunctionLibrary, FunctionValue};
use super::macros::{Macro, MacroFunction, StatementFactory};
use super::registry;
use super::repository::MacroRepository;
use super::value::{OpaqueObject, Value};
use super::{
    functions, DirectoryClient, ProgressSink, StackFunction, StoreClient, ATTR_CAPABILITIES,
    ATTR_CREATION_TIME, ATTR_FETCH_COUNT, ATTR_FETCH_LIMIT, ATTR_GTS_COUNT, ATTR_GTS_LIMIT,
    ATTR_IMPORT_RULES, ATTR_IN_SECURE_MACRO, ATTR_JSON_MAXSIZE, ATTR_LAST_ERROR_POS,
    ATTR_LOOP_MAXDURATION, ATTR_MACRO_NAME, ATTR_MAX_BUCKETS, ATTR_MAX_DEPTH, ATTR_MAX_GEOCELLS,
    ATTR_MAX_OPS, ATTR_MAX_PIXELS, ATTR_MAX_RECURSION, ATTR_MAX_SYMBOLS, ATTR_NAME, ATTR_OPS,
    ATTR_PARSING_ERRORS, ATTR_PROGRESS, ATTR_SECTION_NAME, COUNTER_RETURN_DEPTH,
    TOP_LEVEL_SECTION,
};

// ── Signals ──────────────────────────────────────────────────────────

/// Out-of-band request delivered cooperatively between statements.
/// Ordering matters: a pending signal is only replaced by one of higher
/// priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Signal {
    /// Terminate execution cleanly; cleared once delivered
    Stop,

    /// Terminate execution; the signal sticks so subsequent handlers
    /// abort as well
    Kill,
}

/// Pending-signal slot, shared with the stack registry so other threads
/// can signal a running stack.
pub struct SignalSlot {
    pending: Mutex<Option<Signal>>,
}

impl SignalSlot {
    fn new() -> Arc<Self> {
        Arc::new(SignalSlot {
            pending: Mutex::new(None),
        })
    }

    /// Record `signal` unless a signal of higher priority is already
    /// pending.
    pub fn raise(&self, signal: Signal) {
        let mut pending = lock_tolerant(&self.pending);
        match *pending {
            Some(current) if current >= signal => {}
            _ => *pending = Some(signal),
        }
    }

    /// Deliver the pending signal, if any. STOP is cleared on delivery,
    /// KILL is retained.
    fn deliver(&self) -> Result<()> {
        let mut pending = lock_tolerant(&self.pending);
        match *pending {
            None => Ok(()),
            Some(Signal::Stop) => {
                *pending = None;
                Err(ScriptError::Stop)
            }
            Some(Signal::Kill) => Err(ScriptError::Kill),
        }
    }

    fn is_pending(&self) -> bool {
        lock_tolerant(&self.pending).is_some()
    }
}

fn lock_tolerant<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Shared budgets ───────────────────────────────────────────────────

/// Budget counters shared between a stack and its substacks. Substack
/// drivers must not run concurrently with their parent; the atomics only
/// make the sharing sound, they do not make execution parallel.
pub(crate) struct SharedCounters {
    ops: AtomicU64,
    reclevel: AtomicU64,
    counters: Vec<Arc<AtomicI64>>,
}

impl SharedCounters {
    fn new() -> Arc<Self> {
        Arc::new(SharedCounters {
            ops: AtomicU64::new(0),
            reclevel: AtomicU64::new(0),
            counters: vec![Arc::new(AtomicI64::new(0))],
        })
    }

    pub(crate) fn current_ops(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }
}

// ── Secure-mode flag ─────────────────────────────────────────────────

/// Secure-macro flag with parent chaining for substacks: a stack is in
/// secure mode when its own flag is set or any ancestor's is. Privilege
/// can never be lowered through a child.
pub(crate) struct SecureFlag {
    own: AtomicBool,
    parent: Option<Arc<SecureFlag>>,
}

impl SecureFlag {
    fn new(parent: Option<Arc<SecureFlag>>) -> Arc<Self> {
        Arc::new(SecureFlag {
            own: AtomicBool::new(false),
            parent,
        })
    }

    fn effective(&self) -> bool {
        if self.own.load(Ordering::Relaxed) {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.effective(),
            None => false,
        }
    }

    fn parent_effective(&self) -> bool {
        match &self.parent {
            Some(parent) => parent.effective(),
            None => false,
        }
    }

    fn own_value(&self) -> bool {
        self.own.load(Ordering::Relaxed)
    }

    fn set_own(&self, value: bool) {
        self.own.store(value, Ordering::Relaxed);
    }
}

// ── Attributes ───────────────────────────────────────────────────────

/// A stack attribute. Attributes store per-stack settings: limits, the
/// section name, flags, the statement factory hook, the import rules,
/// the audit error list and anything functions care to stash.
#[derive(Clone)]
pub enum Attribute {
    Long(i64),
    Bool(bool),
    Str(String),
    Counter(Arc<AtomicI64>),
    Capabilities(HashMap<String, String>),
    ImportRules(BTreeMap<String, String>),
    Factory(Arc<dyn StatementFactory>),
    Errors(Arc<Mutex<Vec<Arc<AuditStatement>>>>),
    Progress(Arc<dyn ProgressSink>),
    Value(Value),
}

impl Attribute {
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Attribute::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(s) => Some(s),
            _ => None,
        }
    }
}

// ── Context snapshot ─────────────────────────────────────────────────

/// Snapshot of the symbol table, register file and redefinition table,
/// pushed by `save` and consumed by `restore`. The value stack, the
/// attribute map and the limits are not part of the snapshot.
pub struct StackContext {
    symbols: HashMap<String, Value>,
    registers: Vec<Value>,
    defined: HashMap<String, Arc<dyn StackFunction>>,
}

impl OpaqueObject for StackContext {
    fn type_label(&self) -> &'static str {
        "context"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── The stack ────────────────────────────────────────────────────────

/// Initial physical capacity of the value buffer
const INITIAL_CAPACITY: usize = 32;

pub struct MemoryStack {
    // Value stack. The visible window is elements[offset..offset+size];
    // the first `offset` elements are hidden but preserved.
    elements: Vec<Value>,
    size: usize,
    offset: usize,

    // Fast-access mirrors of the limit attributes
    maxdepth: usize,
    maxops: u64,
    maxsymbols: usize,
    maxrecurse: u64,

    section_name: String,
    macro_name: Option<String>,

    secure: Arc<SecureFlag>,
    counters: Arc<SharedCounters>,
    signal: Arc<SignalSlot>,

    symbols: HashMap<String, Value>,
    registers: Vec<Value>,
    attributes: Arc<Mutex<HashMap<String, Attribute>>>,

    /// User-redefined functions, consulted before the library
    defined: HashMap<String, Arc<dyn StackFunction>>,

    library: Arc<FunctionLibrary>,
    repositories: Vec<Arc<dyn MacroRepository>>,

    store_client: Option<Arc<dyn StoreClient>>,
    directory_client: Option<Arc<dyn DirectoryClient>>,

    progress_sink: Option<Arc<dyn ProgressSink>>,

    uuid: String,
    creation_time_ms: i64,
    registered: bool,

    /// Removing a redefinition either unshadows the library function or
    /// installs a failing stub, depending on configuration
    unshadow: bool,

    function_metrics: bool,

    // ── Parser state (driven from the parser module) ──
    /// Macros under construction, innermost last
    pub(super) open_macros: Vec<Macro>,

    /// Depth of `open_macros` right after `macro_open`, 0 when not in
    /// forced-macro mode
    pub(super) forced_macro: usize,

    pub(super) in_comment: bool,
    pub(super) multiline: Option<String>,
    pub(super) secure_script: Option<String>,
    pub(super) audit_mode: bool,
}

impl MemoryStack {
    pub fn new(
        store_client: Option<Arc<dyn StoreClient>>,
        directory_client: Option<Arc<dyn DirectoryClient>>,
        config: &StackConfig,
        library: Arc<FunctionLibrary>,
    ) -> Self {
        let creation_time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let mut stack = MemoryStack {
            elements: Vec::with_capacity(INITIAL_CAPACITY.min(config.max_depth)),
            size: 0,
            offset: 0,
            maxdepth: config.max_depth,
            maxops: config.max_ops,
            maxsymbols: config.max_symbols,
            maxrecurse: config.max_recursion,
            section_name: TOP_LEVEL_SECTION.to_string(),
            macro_name: None,
            secure: SecureFlag::new(None),
            counters: SharedCounters::new(),
            signal: SignalSlot::new(),
            symbols: HashMap::new(),
            registers: vec![Value::Null; config.registers],
            attributes: Arc::new(Mutex::new(HashMap::new())),
            defined: HashMap::new(),
            library,
            repositories: Vec::new(),
            store_client,
            directory_client,
            progress_sink: None,
            uuid: Uuid::new_v4().to_string(),
            creation_time_ms,
            registered: false,
            unshadow: config.unshadow,
            function_metrics: true,
            open_macros: Vec::new(),
            forced_macro: 0,
            in_comment: false,
            multiline: None,
            secure_script: None,
            audit_mode: false,
        };

        stack.init_attributes(config);
        stack
    }

    fn init_attributes(&mut self, config: &StackConfig) {
        let mut attrs = lock_tolerant(&self.attributes);
        attrs.insert(ATTR_MAX_DEPTH.into(), Attribute::Long(config.max_depth as i64));
        attrs.insert(ATTR_MAX_OPS.into(), Attribute::Long(config.max_ops as i64));
        attrs.insert(ATTR_MAX_SYMBOLS.into(), Attribute::Long(config.max_symbols as i64));
        attrs.insert(ATTR_MAX_RECURSION.into(), Attribute::Long(config.max_recursion as i64));
        attrs.insert(ATTR_FETCH_LIMIT.into(), Attribute::Long(config.fetch_limit));
        attrs.insert(ATTR_GTS_LIMIT.into(), Attribute::Long(config.gts_limit));
        attrs.insert(ATTR_LOOP_MAXDURATION.into(), Attribute::Long(config.loop_max_duration_ms));
        attrs.insert(ATTR_MAX_BUCKETS.into(), Attribute::Long(config.max_buckets));
        attrs.insert(ATTR_MAX_PIXELS.into(), Attribute::Long(config.max_pixels));
        attrs.insert(ATTR_MAX_GEOCELLS.into(), Attribute::Long(config.max_geocells));
        attrs.insert(ATTR_JSON_MAXSIZE.into(), Attribute::Long(config.json_max_size));
        attrs.insert(
            ATTR_FETCH_COUNT.into(),
            Attribute::Counter(Arc::new(AtomicI64::new(0))),
        );
        attrs.insert(
            ATTR_GTS_COUNT.into(),
            Attribute::Counter(Arc::new(AtomicI64::new(0))),
        );
        attrs.insert(ATTR_SECTION_NAME.into(), Attribute::Str(TOP_LEVEL_SECTION.into()));
    }

    // ── Identity ──

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn creation_time_ms(&self) -> i64 {
        self.creation_time_ms
    }

    pub fn store_client(&self) -> Option<&Arc<dyn StoreClient>> {
        self.store_client.as_ref()
    }

    pub fn directory_client(&self) -> Option<&Arc<dyn DirectoryClient>> {
        self.directory_client.as_ref()
    }

    pub fn push_repository(&mut self, repository: Arc<dyn MacroRepository>) {
        self.repositories.push(repository);
    }

    pub fn set_function_metrics(&mut self, state: bool) {
        self.function_metrics = state;
    }

    pub(super) fn function_metrics(&self) -> bool {
        self.function_metrics
    }

    // ── Core stack operations ──

    pub fn depth(&self) -> usize {
        self.size
    }

    pub fn clear(&mut self) {
        self.size = 0;
        self.elements.truncate(self.offset);
    }

    /// Truncate the visible window to at most `depth` elements
    pub fn reset(&mut self, depth: i64) -> Result<()> {
        if depth < 0 {
            return Err(ScriptError::InvalidLevel);
        }
        let depth = depth as usize;
        if self.size > depth {
            self.size = depth;
            self.elements.truncate(self.offset + self.size);
        }
        Ok(())
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        self.ensure_capacity(1)?;
        self.elements.push(value);
        self.size += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value> {
        if 0 == self.size {
            return Err(ScriptError::EmptyStack);
        }
        self.size -= 1;
        self.elements.pop().ok_or(ScriptError::EmptyStack)
    }

    pub fn drop_top(&mut self) -> Result<()> {
        self.pop().map(|_| ())
    }

    /// Drop n elements, n popped from the top
    pub fn dropn(&mut self) -> Result<()> {
        let n = self.pop_count()?;
        if n < 0 || self.size < n as usize {
            return Err(ScriptError::InvalidLevel);
        }
        self.size -= n as usize;
        self.elements.truncate(self.offset + self.size);
        Ok(())
    }

    pub fn dup(&mut self) -> Result<()> {
        if 0 == self.size {
            return Err(ScriptError::EmptyStack);
        }
        let element = self.elements[self.offset + self.size - 1].clone();
        self.push(element)
    }

    /// Duplicate the top n elements as a block, n popped from the top
    pub fn dupn(&mut self) -> Result<()> {
        let n = self.pop_count()?;
        if n < 0 || self.size < n as usize {
            return Err(ScriptError::InvalidLevel);
        }
        let n = n as usize;
        self.ensure_capacity(n)?;
        for _ in 0..n {
            let element = self.elements[self.offset + self.size - n].clone();
            self.elements.push(element);
            self.size += 1;
        }
        Ok(())
    }

    /// Pop n elements, n popped from the top; returned bottom first
    pub fn popn(&mut self) -> Result<Vec<Value>> {
        let n = self.pop_count()?;
        if n < 0 {
            return Err(ScriptError::InvalidLevel);
        }
        self.popn_n(n as usize)
    }

    pub fn popn_n(&mut self, n: usize) -> Result<Vec<Value>> {
        if self.size < n {
            return Err(ScriptError::InvalidLevel);
        }
        let popped = self.elements.split_off(self.offset + self.size - n);
        self.size -= n;
        Ok(popped)
    }

    pub fn swap(&mut self) -> Result<()> {
        if 0 == self.size {
            return Err(ScriptError::EmptyStack);
        }
        if self.size < 2 {
            return Err(ScriptError::InvalidLevel);
        }
        let top = self.offset + self.size - 1;
        self.elements.swap(top, top - 1);
        Ok(())
    }

    pub fn peek(&self) -> Result<&Value> {
        if 0 == self.size {
            return Err(ScriptError::EmptyStack);
        }
        Ok(&self.elements[self.offset + self.size - 1])
    }

    /// Element at level n from the top, 0 being the top
    pub fn get(&self, n: i64) -> Result<&Value> {
        if n < 0 || n as usize >= self.size {
            return Err(ScriptError::InvalidLevel);
        }
        Ok(&self.elements[self.offset + self.size - 1 - n as usize])
    }

    /// Element at level n, n popped from the top
    pub fn peekn(&mut self) -> Result<Value> {
        let n = self.pop_count()?;
        self.get(n).cloned()
    }

    /// Cyclic rotation of the top three elements, third from top lands
    /// on top
    pub fn rot(&mut self) -> Result<()> {
        if 0 == self.size {
            return Err(ScriptError::EmptyStack);
        }
        if self.size < 3 {
            return Err(ScriptError::InvalidLevel);
        }
        let base = self.offset + self.size - 3;
        self.elements[base..].rotate_left(1);
        Ok(())
    }

    /// Cyclic rotation of the top n elements upward, n popped from the top
    pub fn roll(&mut self) -> Result<()> {
        let n = self.pop_count()?;
        if n < 0 || self.size < n as usize {
            return Err(ScriptError::InvalidLevel);
        }
        if n > 0 {
            let base = self.offset + self.size - n as usize;
            self.elements[base..].rotate_left(1);
        }
        Ok(())
    }

    /// Cyclic rotation of the top n elements downward, n popped from the top
    pub fn rolld(&mut self) -> Result<()> {
        let n = self.pop_count()?;
        if n < 0 || self.size < n as usize {
            return Err(ScriptError::InvalidLevel);
        }
        if n > 0 {
            let base = self.offset + self.size - n as usize;
            self.elements[base..].rotate_right(1);
        }
        Ok(())
    }

    /// Copy the n-th element from the top onto the top, n popped from
    /// the top, 1 being the top itself
    pub fn pick(&mut self) -> Result<()> {
        let n = self.pop_count()?;
        if n < 1 || self.size < n as usize {
            return Err(ScriptError::InvalidLevel);
        }
        self.ensure_capacity(1)?;
        let element = self.elements[self.offset + self.size - n as usize].clone();
        self.elements.push(element);
        self.size += 1;
        Ok(())
    }

    /// Consume the top of the stack as a count
    fn pop_count(&mut self) -> Result<i64> {
        if 0 == self.size {
            return Err(ScriptError::EmptyStack);
        }
        let top = self.pop()?;
        top.as_count()
    }

    // ── Hide / show ──

    /// Hide all visible elements, returning how many were hidden
    pub fn hide_all(&mut self) -> usize {
        let count = self.size;
        self.offset += count;
        self.size -= count;
        count
    }

    /// Hide `count` elements. A negative count means "keep -count
    /// visible, hide the rest". Returns how many were hidden.
    pub fn hide(&mut self, count: i64) -> usize {
        let mut count = count;
        if 0 == count {
            return 0;
        } else if count > self.size as i64 {
            count = self.size as i64;
        } else if count < 0 {
            count += self.size as i64;
            if count < 0 {
                count = 0;
            }
        }
        let count = count as usize;
        self.offset += count;
        self.size -= count;
        count
    }

    /// Show every hidden element
    pub fn show_all(&mut self) {
        let count = self.offset;
        self.offset -= count;
        self.size += count;
    }

    /// Show `count` hidden elements. A negative count means "leave
    /// -count visible in total", doing nothing when that many are
    /// already visible.
    pub fn show(&mut self, count: i64) {
        let mut count = count;
        if 0 == count {
            return;
        } else if count > self.offset as i64 {
            count = self.offset as i64;
        } else if count < 0 {
            count += self.size as i64;
            if count > 0 {
                count = 0;
            } else if -count > self.offset as i64 {
                count = self.offset as i64;
            } else {
                count = -count;
            }
        }
        let count = count as usize;
        self.offset -= count;
        self.size += count;
    }

    /// Number of currently hidden elements
    pub fn hidden(&self) -> usize {
        self.offset
    }

    fn ensure_capacity(&mut self, n: usize) -> Result<()> {
        let needed = self.offset + self.size + n;
        if needed > self.maxdepth {
            metrics::record_depth_exceeded();
            return Err(ScriptError::DepthExceeded(self.maxdepth));
        }
        if needed > self.elements.capacity() {
            let grown = self
                .elements
                .capacity()
                .saturating_add(self.elements.capacity() / 2)
                .saturating_add(n)
                .min(self.maxdepth);
            self.elements.reserve_exact(grown - self.elements.len());
        }
        Ok(())
    }

    /// Render the top n visible levels as text, deepest first
    pub fn dump(&self, n: usize) -> String {
        let n = n.min(self.size);
        let mut out = String::new();
        for i in (0..n).rev() {
            out.push_str(&format!(
                "{}: {}\n",
                i + 1,
                self.elements[self.offset + self.size - 1 - i]
            ));
        }
        out
    }

    // ── Symbols and registers ──

    pub fn load(&self, symbol: &str) -> Option<Value> {
        self.symbols.get(symbol).cloned()
    }

    pub fn store(&mut self, symbol: impl Into<String>, value: Value) -> Result<()> {
        if self.symbols.len() >= self.maxsymbols {
            return Err(ScriptError::SymbolsExceeded(self.maxsymbols));
        }
        self.symbols.insert(symbol.into(), value);
        Ok(())
    }

    /// Remove one symbol, or every symbol when `symbol` is None
    pub fn forget(&mut self, symbol: Option<&str>) {
        match symbol {
            Some(name) => {
                self.symbols.remove(name);
            }
            None => self.symbols.clear(),
        }
    }

    pub fn symbol_table(&self) -> &HashMap<String, Value> {
        &self.symbols
    }

    pub fn load_register(&self, index: i64) -> Result<Value> {
        if index < 0 || index as usize >= self.registers.len() {
            return Err(ScriptError::RegisterOutOfRange {
                index,
                max: self.registers.len(),
            });
        }
        Ok(self.registers[index as usize].clone())
    }

    pub fn store_register(&mut self, index: i64, value: Value) -> Result<()> {
        if index < 0 || index as usize >= self.registers.len() {
            return Err(ScriptError::RegisterOutOfRange {
                index,
                max: self.registers.len(),
            });
        }
        self.registers[index as usize] = value;
        Ok(())
    }

    pub fn registers(&self) -> &[Value] {
        &self.registers
    }

    // ── Attributes ──

    /// Set an attribute; `None` removes it. Writes to recognized keys
    /// are mirrored to fast-access fields, and setting the name
    /// attribute registers the stack in the process registry.
    pub fn set_attribute(&mut self, key: &str, value: Option<Attribute>) -> Result<Option<Attribute>> {
        let value = match value {
            None => {
                return Ok(lock_tolerant(&self.attributes).remove(key));
            }
            Some(value) => value,
        };

        // The secure flag is stored out of band so substacks cannot be
        // used to lower privilege.
        if ATTR_IN_SECURE_MACRO == key {
            let old = self.in_secure_macro();
            if let Attribute::Bool(requested) = value {
                if !self.secure.parent_effective() {
                    self.secure.set_own(requested);
                }
            }
            return Ok(Some(Attribute::Bool(old)));
        }

        match key {
            ATTR_MAX_DEPTH => {
                let maxdepth = value.as_long().unwrap_or(0).max(0) as usize;
                if self.elements.capacity() > maxdepth {
                    if self.size + self.offset > maxdepth {
                        return Err(ScriptError::DepthExceeded(maxdepth));
                    }
                    self.elements.shrink_to(maxdepth);
                }
                self.maxdepth = maxdepth;
            }
            ATTR_MAX_OPS => {
                self.maxops = value.as_long().unwrap_or(0).max(0) as u64;
            }
            ATTR_MAX_RECURSION => {
                self.maxrecurse = value.as_long().unwrap_or(0).max(0) as u64;
            }
            ATTR_MAX_SYMBOLS => {
                self.maxsymbols = value.as_long().unwrap_or(0).max(0) as usize;
            }
            ATTR_OPS => {
                self.counters
                    .ops
                    .store(value.as_long().unwrap_or(0).max(0) as u64, Ordering::Relaxed);
            }
            ATTR_SECTION_NAME => {
                if let Some(name) = value.as_str() {
                    self.section_name = name.to_string();
                }
            }
            ATTR_MACRO_NAME => {
                self.macro_name = value.as_str().map(str::to_string);
            }
            ATTR_PROGRESS => {
                if let Attribute::Progress(sink) = &value {
                    self.progress_sink = Some(sink.clone());
                }
            }
            ATTR_NAME => {
                // Register the stack once it is named; anonymous stacks
                // stay out of the registry.
                if let Some(name) = value.as_str() {
                    registry::register(registry::StackDescriptor {
                        uuid: self.uuid.clone(),
                        name: name.to_string(),
                        creation_time_ms: self.creation_time_ms,
                        signal: self.signal.clone(),
                        counters: self.counters.clone(),
                    });
                    self.registered = true;
                }
            }
            _ => {}
        }

        Ok(lock_tolerant(&self.attributes).insert(key.to_string(), value))
    }

    pub fn get_attribute(&self, key: &str) -> Option<Attribute> {
        match key {
            ATTR_IN_SECURE_MACRO => Some(Attribute::Bool(self.in_secure_macro())),
            ATTR_OPS => Some(Attribute::Long(self.current_ops() as i64)),
            ATTR_SECTION_NAME => Some(Attribute::Str(self.section_name.clone())),
            ATTR_MACRO_NAME => self.macro_name.clone().map(Attribute::Str),
            ATTR_CREATION_TIME => Some(Attribute::Long(self.creation_time_ms)),
            _ => lock_tolerant(&self.attributes).get(key).cloned(),
        }
    }

    /// Value of a granted capability, if any
    pub fn capability(&self, name: &str) -> Option<String> {
        match self.get_attribute(ATTR_CAPABILITIES) {
            Some(Attribute::Capabilities(caps)) => caps.get(name).cloned(),
            _ => None,
        }
    }

    pub(super) fn set_last_error_position(&mut self, position: String) {
        lock_tolerant(&self.attributes)
            .insert(ATTR_LAST_ERROR_POS.to_string(), Attribute::Str(position));
    }

    pub fn section_name(&self) -> &str {
        &self.section_name
    }

    pub fn macro_name(&self) -> Option<&str> {
        self.macro_name.as_deref()
    }

    pub fn in_secure_macro(&self) -> bool {
        self.secure.effective()
    }

    /// Lift every limit to its maximum
    pub fn max_limits(&mut self) {
        self.maxdepth = usize::MAX >> 1;
        self.maxops = u64::MAX - 1;
        self.maxsymbols = usize::MAX >> 1;
        self.maxrecurse = u64::MAX - 1;
        let mut attrs = lock_tolerant(&self.attributes);
        for key in [
            ATTR_FETCH_LIMIT,
            ATTR_GTS_LIMIT,
            ATTR_LOOP_MAXDURATION,
            ATTR_MAX_BUCKETS,
            ATTR_MAX_PIXELS,
            ATTR_MAX_GEOCELLS,
            ATTR_JSON_MAXSIZE,
        ] {
            attrs.insert(key.to_string(), Attribute::Long(i64::MAX - 1));
        }
    }

    // ── Budgets ──

    pub fn current_ops(&self) -> u64 {
        self.counters.ops.load(Ordering::Relaxed)
    }

    pub fn recursion_level(&self) -> u64 {
        self.counters.reclevel.load(Ordering::Relaxed)
    }

    pub(super) fn inc_ops(&self) {
        self.counters.ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn check_ops(&self) -> Result<()> {
        let current = self.current_ops();
        if current > self.maxops {
            metrics::record_ops_exceeded();
            return Err(ScriptError::OpCountExceeded {
                current,
                max: self.maxops,
            });
        }
        Ok(())
    }

    pub(super) fn recurse_in(&self) -> Result<()> {
        let level = self.counters.reclevel.fetch_add(1, Ordering::SeqCst) + 1;
        if level > self.maxrecurse {
            self.counters.reclevel.fetch_sub(1, Ordering::SeqCst);
            return Err(ScriptError::RecursionExceeded(level));
        }
        Ok(())
    }

    pub(super) fn recurse_out(&self) {
        self.counters.reclevel.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn counter(&self, index: usize) -> Result<Arc<AtomicI64>> {
        self.counters
            .counters
            .get(index)
            .cloned()
            .ok_or_else(|| ScriptError::Runtime("Invalid counter.".to_string()))
    }

    // ── Signals ──

    /// Record a signal for cooperative delivery at the next check point
    pub fn signal(&self, signal: Signal) {
        self.signal.raise(signal);
    }

    /// Shared handle on this stack's signal slot, for drivers that need
    /// to signal from another thread without going through the registry
    pub fn signal_slot(&self) -> Arc<SignalSlot> {
        self.signal.clone()
    }

    pub(super) fn handle_signal(&self) -> Result<()> {
        if self.signal.is_pending() {
            self.signal.deliver()
        } else {
            Ok(())
        }
    }

    pub(super) fn progress(&self) {
        if let Some(sink) = &self.progress_sink {
            sink.progress();
        }
    }

    // ── Parser state queries ──

    /// Depth of macros being defined
    pub fn macro_depth(&self) -> usize {
        self.open_macros.len()
    }

    pub fn is_in_multiline(&self) -> bool {
        self.multiline.is_some()
    }

    pub fn is_in_comment(&self) -> bool {
        self.in_comment
    }

    pub fn is_in_secure_script(&self) -> bool {
        self.secure_script.is_some()
    }

    pub fn is_audit_mode(&self) -> bool {
        self.audit_mode
    }

    /// Turn audit mode on or off. In audit mode the parser demotes
    /// certain errors into audit statements, recorded both in the macro
    /// under construction and in the parsing-errors attribute. Audit
    /// mode exits when the outermost macro closes.
    pub fn set_audit_mode(&mut self, audit_mode: bool) {
        if audit_mode {
            lock_tolerant(&self.attributes).insert(
                ATTR_PARSING_ERRORS.to_string(),
                Attribute::Errors(Arc::new(Mutex::new(Vec::new()))),
            );
        }
        self.audit_mode = audit_mode;
    }

    pub(super) fn add_audit_error(&self, statement: Arc<AuditStatement>) {
        if let Some(Attribute::Errors(list)) = self.get_attribute(ATTR_PARSING_ERRORS) {
            lock_tolerant(&list).push(statement);
        }
    }

    /// Parse errors recorded while audit mode was active
    pub fn parsing_errors(&self) -> Vec<Arc<AuditStatement>> {
        match self.get_attribute(ATTR_PARSING_ERRORS) {
            Some(Attribute::Errors(list)) => lock_tolerant(&list).clone(),
            _ => Vec::new(),
        }
    }

    // ── Function and macro resolution ──

    /// Resolve a statement name: redefinitions first, then the library
    pub fn find_function(&self, stmt: &str) -> Result<FunctionValue> {
        if let Some(function) = self.defined.get(stmt) {
            if let Some(Attribute::Bool(false)) = self.get_attribute(super::ATTR_ALLOW_REDEFINED) {
                return Err(ScriptError::DisallowedRedefined(stmt.to_string()));
            }
            return Ok(FunctionValue::Stack(function.clone()));
        }
        self.library
            .lookup(stmt)
            .ok_or_else(|| ScriptError::UnknownFunction(stmt.to_string()))
    }

    /// (Re)define a statement. `None` clears the redefinition: either
    /// unshadowing the library function or installing a stub that fails
    /// with an "is undefined" message, per configuration.
    pub fn define(&mut self, stmt: &str, body: Option<Arc<Macro>>) {
        match body {
            Some(body) => {
                self.defined
                    .insert(stmt.to_string(), MacroFunction::wrap(stmt, body));
            }
            None => {
                if self.unshadow {
                    self.defined.remove(stmt);
                } else {
                    let mut undef = Macro::new();
                    undef.add(Value::String("is undefined.".to_string()));
                    undef.add(Value::Function(Arc::new(functions::control::MsgFail::named(
                        stmt,
                    ))));
                    self.defined
                        .insert(stmt.to_string(), MacroFunction::wrap(stmt, Arc::new(undef)));
                }
            }
        }
    }

    pub fn defined_functions(&self) -> &HashMap<String, Arc<dyn StackFunction>> {
        &self.defined
    }

    /// Find a macro by symbol: import rules first, then the local
    /// symbol table, then the repository chain.
    pub fn find_macro(&mut self, symbol: &str) -> Result<Arc<Macro>> {
        let symbol = self.rewrite_macro_symbol(symbol);

        let mut candidate: Option<Value> = self.symbols.get(&symbol).cloned();

        if candidate.is_none() {
            for repository in &self.repositories {
                if let Some(found) = repository.find(self, &symbol) {
                    candidate = Some(Value::Macro(found));
                    break;
                }
            }
        }

        match candidate {
            None => Err(ScriptError::UnknownMacro(symbol)),
            Some(Value::Macro(found)) => Ok(found),
            Some(_) => Err(ScriptError::NotAMacro(symbol)),
        }
    }

    /// Resolve and execute a macro by symbol
    pub fn run(&mut self, symbol: &str) -> Result<()> {
        let found = self.find_macro(symbol)?;
        self.exec_macro(&found)
    }

    fn rewrite_macro_symbol(&self, symbol: &str) -> String {
        if let Some(Attribute::ImportRules(rules)) = self.get_attribute(ATTR_IMPORT_RULES) {
            // First matching prefix wins, scanning in ascending key order
            for (prefix, substitute) in rules.iter() {
                if let Some(rest) = symbol.strip_prefix(prefix.as_str()) {
                    return format!("{}{}", substitute, rest);
                }
            }
        }
        symbol.to_string()
    }

    // ── Macro execution ──

    /// Execute a macro: iterate its statements in order, applying stack
    /// functions and pushing everything else.
    pub fn exec_macro(&mut self, mac: &Macro) -> Result<()> {
        // One op for the invocation itself, then one per statement
        self.inc_ops();

        let saved_secure = self.secure.own_value();
        let saved_section = self.section_name.clone();
        let saved_macro_name = self.macro_name.clone();

        // Monotonic escalation: an inner macro can raise the secure
        // level, never lower it
        self.secure.set_own(saved_secure || mac.is_secure());
        self.macro_name = mac.name().map(str::to_string);

        let started = Instant::now();
        let outcome = self.exec_macro_statements(mac);

        let outcome = match outcome {
            Ok(()) => Ok(()),
            Err((_, ScriptError::Return)) => {
                // The return counter tells how many frames to unwind
                let depth = self.counters.counters[COUNTER_RETURN_DEPTH]
                    .fetch_sub(1, Ordering::SeqCst)
                    - 1;
                if depth > 0 {
                    Err(ScriptError::Return)
                } else {
                    Ok(())
                }
            }
            Err((_, err)) if err.is_async_control() => Err(err),
            Err((index, err)) => {
                if self.in_secure_macro() {
                    // A secure frame is an opaque barrier, the raw cause
                    // propagates without source-level context
                    Err(err)
                } else {
                    Err(self.frame_macro_error(mac, index, err))
                }
            }
        };

        self.secure.set_own(saved_secure);
        self.section_name = saved_section;
        self.macro_name = saved_macro_name;
        mac.record_call(started.elapsed());

        outcome
    }

    fn exec_macro_statements(&mut self, mac: &Macro) -> std::result::Result<(), (usize, ScriptError)> {
        if let Err(err) = self.recurse_in() {
            return Err((0, err));
        }

        self.progress();

        let mut outcome = Ok(());

        for index in 0..mac.len() {
            if let Err(err) = self.handle_signal() {
                outcome = Err((index, err));
                break;
            }

            self.inc_ops();

            let step = match mac.get(index) {
                Some(Value::Function(function)) => {
                    let function = function.clone();
                    function.apply(self)
                }
                Some(statement) => {
                    let statement = statement.clone();
                    self.push(statement)
                }
                None => Ok(()),
            };

            if let Err(err) = step {
                outcome = Err((index, err));
                break;
            }
        }

        if outcome.is_ok() {
            if let Err(err) = self.check_ops() {
                outcome = Err((mac.len(), err));
            }
        }

        self.recurse_out();
        outcome
    }

    fn frame_macro_error(&self, mac: &Macro, index: usize, cause: ScriptError) -> ScriptError {
        let at = mac
            .get(index)
            .map(|statement| format!(" at '{}'", statement.statement_label()))
            .unwrap_or_default();

        let position = match self.get_attribute(ATTR_LAST_ERROR_POS) {
            Some(Attribute::Str(position)) => format!(" at position {}", position),
            _ => String::new(),
        };

        let from = match mac.name() {
            Some(name) => format!(" called from macro '{}'", name),
            None => String::new(),
        };

        ScriptError::Framed {
            message: format!(
                "Exception{} in section '{}'{}{}",
                at, self.section_name, position, from
            ),
            cause: Box::new(cause),
        }
    }

    // ── Context save / restore ──

    /// Snapshot the symbol table, registers and redefinitions into an
    /// opaque context pushed on the stack
    pub fn save(&mut self) -> Result<()> {
        let context = StackContext {
            symbols: self.symbols.clone(),
            registers: self.registers.clone(),
            defined: self.defined.clone(),
        };
        self.push(Value::Object(Arc::new(context)))
    }

    /// Overwrite the symbol table, registers and redefinitions from a
    /// snapshot. The value stack, attributes and limits are untouched.
    pub fn restore_context(&mut self, context: &StackContext) {
        self.symbols = context.symbols.clone();
        self.registers = context.registers.clone();
        self.defined = context.defined.clone();
    }

    /// Pop a context from the top of the stack and apply it
    pub fn restore(&mut self) -> Result<()> {
        let top = self.pop()?;
        let context = match &top {
            Value::Object(object) => object.as_any().downcast_ref::<StackContext>(),
            _ => None,
        };
        match context {
            Some(context) => {
                self.restore_context(context);
                Ok(())
            }
            None => Err(ScriptError::Type("Invalid stack context.".to_string())),
        }
    }

    // ── Substack ──

    /// Derive a child stack sharing this stack's budget counters and
    /// attribute map. The child gets its own value stack, symbols,
    /// registers, redefinitions and parser state, and its own secure
    /// flag chained to this stack's: a secure parent forces the child
    /// secure, a non-secure parent lets it escalate independently.
    pub fn substack(&self) -> MemoryStack {
        let creation_time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        MemoryStack {
            elements: Vec::with_capacity(INITIAL_CAPACITY.min(self.maxdepth)),
            size: 0,
            offset: 0,
            maxdepth: self.maxdepth,
            maxops: self.maxops,
            maxsymbols: self.maxsymbols,
            maxrecurse: self.maxrecurse,
            section_name: self.section_name.clone(),
            macro_name: None,
            secure: SecureFlag::new(Some(self.secure.clone())),
            counters: self.counters.clone(),
            signal: SignalSlot::new(),
            symbols: HashMap::new(),
            registers: vec![Value::Null; self.registers.len()],
            attributes: self.attributes.clone(),
            defined: HashMap::new(),
            library: self.library.clone(),
            repositories: self.repositories.clone(),
            store_client: self.store_client.clone(),
            directory_client: self.directory_client.clone(),
            progress_sink: self.progress_sink.clone(),
            uuid: Uuid::new_v4().to_string(),
            creation_time_ms,
            registered: false,
            unshadow: self.unshadow,
            function_metrics: self.function_metrics,
            open_macros: Vec::new(),
            forced_macro: 0,
            in_comment: false,
            multiline: None,
            secure_script: None,
            audit_mode: false,
        }
    }
}

impl Drop for MemoryStack {
    fn drop(&mut self) {
        if self.registered {
            registry::unregister(&self.uuid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::library::FunctionLibrary;

    fn stack() -> MemoryStack {
        MemoryStack::new(
            None,
            None,
            &StackConfig::default(),
            Arc::new(FunctionLibrary::with_core()),
        )
    }

    #[test]
    fn test_push_pop_depth() {
        let mut s = stack();
        s.push(Value::Long(1)).unwrap();
        s.push(Value::Long(2)).unwrap();
        assert_eq!(s.depth(), 2);
        assert_eq!(s.pop().unwrap(), Value::Long(2));
        assert_eq!(s.depth(), 1);
    }

    #[test]
    fn test_pop_empty_fails() {
        let mut s = stack();
        assert!(matches!(s.pop(), Err(ScriptError::EmptyStack)));
    }

    #[test]
    fn test_swap_rot_roll() {
        let mut s = stack();
        for n in 1..=4 {
            s.push(Value::Long(n)).unwrap();
        }
        s.swap().unwrap(); // 1 2 4 3
        assert_eq!(s.peek().unwrap(), &Value::Long(3));
        s.rot().unwrap(); // 1 4 3 2
        assert_eq!(s.peek().unwrap(), &Value::Long(2));
        s.push(Value::Long(4)).unwrap(); // roll the top 4
        s.roll().unwrap(); // 4 3 2 1
        assert_eq!(s.peek().unwrap(), &Value::Long(1));
        assert_eq!(s.get(3).unwrap(), &Value::Long(4));
    }

    #[test]
    fn test_dupn_duplicates_block() {
        let mut s = stack();
        for n in 1..=3 {
            s.push(Value::Long(n)).unwrap();
        }
        s.push(Value::Long(2)).unwrap();
        s.dupn().unwrap(); // 1 2 3 2 3
        assert_eq!(s.depth(), 5);
        assert_eq!(s.get(0).unwrap(), &Value::Long(3));
        assert_eq!(s.get(1).unwrap(), &Value::Long(2));
        assert_eq!(s.get(2).unwrap(), &Value::Long(3));
    }

    #[test]
    fn test_pick_copies_nth() {
        let mut s = stack();
        for n in 1..=3 {
            s.push(Value::Long(n)).unwrap();
        }
        s.push(Value::Long(3)).unwrap();
        s.pick().unwrap(); // copies bottom (1) to top
        assert_eq!(s.peek().unwrap(), &Value::Long(1));
        assert_eq!(s.depth(), 4);
    }

    #[test]
    fn test_hide_show_roundtrip() {
        let mut s = stack();
        for n in 1..=5 {
            s.push(Value::Long(n)).unwrap();
        }
        let hidden = s.hide(3);
        assert_eq!(hidden, 3);
        assert_eq!(s.depth(), 2);
        assert_eq!(s.get(1).unwrap(), &Value::Long(4));
        s.show(3);
        assert_eq!(s.depth(), 5);
        assert_eq!(s.peek().unwrap(), &Value::Long(5));
    }

    #[test]
    fn test_hide_negative_keeps_visible() {
        let mut s = stack();
        for n in 1..=5 {
            s.push(Value::Long(n)).unwrap();
        }
        // keep 2 visible
        assert_eq!(s.hide(-2), 3);
        assert_eq!(s.depth(), 2);
    }

    #[test]
    fn test_show_negative_targets_total() {
        let mut s = stack();
        for n in 1..=5 {
            s.push(Value::Long(n)).unwrap();
        }
        s.hide(4);
        assert_eq!(s.depth(), 1);
        // ask for 3 visible in total
        s.show(-3);
        assert_eq!(s.depth(), 3);
        // already at 3, nothing changes
        s.show(-3);
        assert_eq!(s.depth(), 3);
    }

    #[test]
    fn test_depth_limit_enforced() {
        let mut config = StackConfig::default();
        config.max_depth = 4;
        let mut s = MemoryStack::new(None, None, &config, Arc::new(FunctionLibrary::new()));
        for n in 0..4 {
            s.push(Value::Long(n)).unwrap();
        }
        assert!(matches!(
            s.push(Value::Long(4)),
            Err(ScriptError::DepthExceeded(4))
        ));
    }

    #[test]
    fn test_symbol_limit_enforced() {
        let mut config = StackConfig::default();
        config.max_symbols = 2;
        let mut s = MemoryStack::new(None, None, &config, Arc::new(FunctionLibrary::new()));
        s.store("a", Value::Long(1)).unwrap();
        s.store("b", Value::Long(2)).unwrap();
        assert!(matches!(
            s.store("c", Value::Long(3)),
            Err(ScriptError::SymbolsExceeded(2))
        ));
    }

    #[test]
    fn test_register_bounds() {
        let mut s = stack();
        s.store_register(0, Value::Long(9)).unwrap();
        assert_eq!(s.load_register(0).unwrap(), Value::Long(9));
        assert!(s.load_register(-1).is_err());
        assert!(s.store_register(1 << 20, Value::Null).is_err());
    }

    #[test]
    fn test_save_restore_roundtrip() {
        let mut s = stack();
        s.store("x", Value::Long(1)).unwrap();
        s.store_register(3, Value::String("r".to_string())).unwrap();
        s.save().unwrap();
        s.store("x", Value::Long(99)).unwrap();
        s.store("y", Value::Long(2)).unwrap();
        s.store_register(3, Value::Null).unwrap();
        s.restore().unwrap();
        assert_eq!(s.load("x"), Some(Value::Long(1)));
        assert_eq!(s.load("y"), None);
        assert_eq!(s.load_register(3).unwrap(), Value::String("r".to_string()));
    }

    #[test]
    fn test_restore_requires_context() {
        let mut s = stack();
        s.push(Value::Long(1)).unwrap();
        assert!(s.restore().is_err());
    }

    #[test]
    fn test_exec_macro_pushes_literals_and_applies_functions() {
        let mut s = stack();
        let mut m = Macro::new();
        m.add(Value::Long(1));
        m.add(Value::Long(2));
        s.exec_macro(&m).unwrap();
        assert_eq!(s.depth(), 2);
        assert_eq!(s.peek().unwrap(), &Value::Long(2));
    }

    #[test]
    fn test_exec_macro_recursion_limit() {
        let mut config = StackConfig::default();
        config.max_recursion = 2;
        let mut s = MemoryStack::new(None, None, &config, Arc::new(FunctionLibrary::new()));
        // run a macro that runs itself by symbol
        let mut inner = Macro::new();
        inner.add(Value::String("self".to_string()));
        inner.add(Value::Function(Arc::new(functions::control::Run::new("RUN"))));
        let inner = Arc::new(inner);
        s.store("self", Value::Macro(inner.clone())).unwrap();
        let err = s.run("self").unwrap_err();
        let mut cause: &ScriptError = &err;
        while let ScriptError::Framed { cause: inner, .. } = cause {
            cause = inner;
        }
        assert!(matches!(cause, ScriptError::RecursionExceeded(_)));
        assert_eq!(s.recursion_level(), 0);
    }

    #[test]
    fn test_secure_macro_does_not_frame_errors() {
        let mut s = stack();
        let mut m = Macro::new();
        m.add(Value::String("boom".to_string()));
        m.add(Value::Function(Arc::new(functions::control::MsgFail::named(
            "FAIL",
        ))));
        m.set_secure(true);
        let err = s.exec_macro(&m).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));
        // secure mode is restored after the invocation
        assert!(!s.in_secure_macro());
    }

    #[test]
    fn test_signal_stop_clears_kill_sticks() {
        let s = stack();
        s.signal(Signal::Stop);
        assert!(matches!(s.handle_signal(), Err(ScriptError::Stop)));
        assert!(s.handle_signal().is_ok());

        s.signal(Signal::Kill);
        assert!(matches!(s.handle_signal(), Err(ScriptError::Kill)));
        assert!(matches!(s.handle_signal(), Err(ScriptError::Kill)));
    }

    #[test]
    fn test_signal_priority() {
        let s = stack();
        s.signal(Signal::Kill);
        s.signal(Signal::Stop);
        // STOP must not displace a pending KILL
        assert!(matches!(s.handle_signal(), Err(ScriptError::Kill)));
    }

    #[test]
    fn test_substack_shares_ops_counter() {
        let s = stack();
        let sub = s.substack();
        sub.inc_ops();
        sub.inc_ops();
        assert_eq!(s.current_ops(), 2);
    }

    #[test]
    fn test_substack_secure_escalation() {
        let mut s = stack();
        let mut sub = s.substack();

        // child escalates independently of a non-secure parent
        sub.set_attribute(ATTR_IN_SECURE_MACRO, Some(Attribute::Bool(true)))
            .unwrap();
        assert!(sub.in_secure_macro());
        assert!(!s.in_secure_macro());

        // a secure parent forces the child secure and the child cannot
        // lower it
        s.set_attribute(ATTR_IN_SECURE_MACRO, Some(Attribute::Bool(true)))
            .unwrap();
        let mut sub2 = s.substack();
        assert!(sub2.in_secure_macro());
        sub2.set_attribute(ATTR_IN_SECURE_MACRO, Some(Attribute::Bool(false)))
            .unwrap();
        assert!(sub2.in_secure_macro());
    }

    #[test]
    fn test_maxdepth_shrink_refused_when_window_too_large() {
        let mut s = stack();
        for n in 0..10 {
            s.push(Value::Long(n)).unwrap();
        }
        assert!(s
            .set_attribute(ATTR_MAX_DEPTH, Some(Attribute::Long(5)))
            .is_err());
        assert!(s
            .set_attribute(ATTR_MAX_DEPTH, Some(Attribute::Long(10)))
            .is_ok());
    }

    #[test]
    fn test_import_rules_rewrite() {
        let mut s = stack();
        let mut rules = BTreeMap::new();
        rules.insert("lib/".to_string(), "vendor/lib/".to_string());
        s.set_attribute(ATTR_IMPORT_RULES, Some(Attribute::ImportRules(rules)))
            .unwrap();
        let err = s.find_macro("lib/trend").unwrap_err();
        assert!(matches!(err, ScriptError::UnknownMacro(name) if name == "vendor/lib/trend"));
    }

    #[test]
    fn test_define_stub_keeps_shadowing() {
        let mut s = stack();
        let mut m = Macro::new();
        m.add(Value::Long(42));
        s.define("ANSWER", Some(Arc::new(m)));
        assert!(s.find_function("ANSWER").is_ok());

        s.define("ANSWER", None);
        // not unshadowed: the stub is installed and fails when applied
        let stub = match s.find_function("ANSWER").unwrap() {
            FunctionValue::Stack(f) => f,
            _ => panic!("expected a stack function"),
        };
        let err = stub.apply(&mut s).unwrap_err();
        assert!(err.to_string().contains("is undefined."));
    }

    #[test]
    fn test_dump_renders_levels() {
        let mut s = stack();
        s.push(Value::Long(1)).unwrap();
        s.push(Value::String("two".to_string())).unwrap();
        let dump = s.dump(2);
        assert!(dump.contains("2: 1"));
        assert!(dump.contains("1: 'two'"));
    }
}
