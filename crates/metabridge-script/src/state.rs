//! The script state: value stack, heaps, registry, globals and collector.
//!
//! [`ScriptState`] is a cloneable handle to single-threaded shared state.
//! Every method takes `&self` and holds its internal borrow only for the
//! duration of the primitive, never across a native call, so native
//! functions can freely call back into the state.

use std::cell::RefCell;
use std::fmt;
use std::iter;
use std::rc::Rc;

use tracing::{debug, warn};

use metabridge_core::ScriptError;

use crate::function::{CallContext, Closure, NativeCallable, NativeFn};
use crate::heap::Heap;
use crate::table::Table;
use crate::value::Key;
use crate::{FunctionRef, TableRef, Value};

/// A handle to a value stored in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistryRef(pub i32);

impl RegistryRef {
    /// The reference issued for nil; resolves to nil and is never stored.
    pub const NIL: RegistryRef = RegistryRef(-1);
}

/// What one collection cycle did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Tables reclaimed
    pub tables_freed: usize,
    /// Functions reclaimed
    pub functions_freed: usize,
    /// Finalizers run
    pub finalized: usize,
}

struct ScriptInner {
    stack: Vec<Value>,
    frames: Vec<usize>,
    tables: Heap<TableRef, Table>,
    functions: Heap<FunctionRef, Closure>,
    registry: Vec<Option<Value>>,
    registry_free: Vec<i32>,
    globals: TableRef,
}

impl ScriptInner {
    fn base(&self) -> usize {
        self.frames.last().copied().unwrap_or(0)
    }

    fn absolute(&self, position: i32) -> Result<usize, ScriptError> {
        let base = self.base();
        let len = self.stack.len();
        let index = if position > 0 {
            base + position as usize - 1
        } else if position < 0 {
            match len.checked_sub(position.unsigned_abs() as usize) {
                Some(index) => index,
                None => return Err(ScriptError::InvalidStackIndex(position)),
            }
        } else {
            return Err(ScriptError::InvalidStackIndex(position));
        };
        if index < base || index >= len {
            return Err(ScriptError::InvalidStackIndex(position));
        }
        Ok(index)
    }

    fn table(&self, table: TableRef) -> Result<&Table, ScriptError> {
        self.tables.get(table).ok_or(ScriptError::StaleHandle("table"))
    }

    fn table_mut(&mut self, table: TableRef) -> Result<&mut Table, ScriptError> {
        self.tables
            .get_mut(table)
            .ok_or(ScriptError::StaleHandle("table"))
    }

    /// Mark everything reachable from `gray`.
    fn mark(&mut self, mut gray: Vec<Value>) {
        while let Some(value) = gray.pop() {
            match value {
                Value::Table(t) => {
                    if self.tables.mark(t)
                        && let Some(table) = self.tables.get(t)
                    {
                        gray.extend(table.references());
                    }
                }
                Value::Function(f) => {
                    if self.functions.mark(f)
                        && let Some(closure) = self.functions.get(f)
                    {
                        gray.extend(closure.upvalues.iter().cloned());
                    }
                }
                _ => {}
            }
        }
    }
}

/// Handle to a script state.
#[derive(Clone)]
pub struct ScriptState {
    inner: Rc<RefCell<ScriptInner>>,
}

impl ScriptState {
    pub fn new() -> Self {
        let mut tables = Heap::new();
        let globals = tables.allocate(Table::default());
        Self {
            inner: Rc::new(RefCell::new(ScriptInner {
                stack: Vec::new(),
                frames: Vec::new(),
                tables,
                functions: Heap::new(),
                registry: Vec::new(),
                registry_free: Vec::new(),
                globals,
            })),
        }
    }

    // ========================================================================
    // Stack
    // ========================================================================

    /// Number of values in the current frame.
    pub fn top(&self) -> usize {
        let inner = self.inner.borrow();
        inner.stack.len() - inner.base()
    }

    /// Resize the current frame, padding with nil or dropping values.
    pub fn set_top(&self, top: usize) {
        let mut inner = self.inner.borrow_mut();
        let len = inner.base() + top;
        inner.stack.resize(len, Value::Nil);
    }

    pub fn push(&self, value: Value) {
        self.inner.borrow_mut().stack.push(value);
    }

    /// Pop the top value of the current frame.
    pub fn pop(&self) -> Result<Value, ScriptError> {
        let mut inner = self.inner.borrow_mut();
        if inner.stack.len() <= inner.base() {
            return Err(ScriptError::StackUnderflow {
                needed: 1,
                available: 0,
            });
        }
        inner.stack.pop().ok_or(ScriptError::StackUnderflow {
            needed: 1,
            available: 0,
        })
    }

    /// Read a stack value.
    ///
    /// Positive positions count from the frame bottom (1 is the first
    /// argument), negative ones from the top (-1 is the top).
    pub fn get(&self, position: i32) -> Result<Value, ScriptError> {
        let inner = self.inner.borrow();
        let index = inner.absolute(position)?;
        Ok(inner.stack[index].clone())
    }

    // ========================================================================
    // Tables
    // ========================================================================

    pub fn create_table(&self) -> TableRef {
        self.inner.borrow_mut().tables.allocate(Table::default())
    }

    /// Read without metamethods.
    pub fn raw_get(&self, table: TableRef, key: &Value) -> Result<Value, ScriptError> {
        let inner = self.inner.borrow();
        let table = inner.table(table)?;
        match key {
            Value::Nil => Ok(Value::Nil),
            Value::Number(n) if n.is_nan() => Ok(Value::Nil),
            other => Ok(table.get(&Key::from_value(other)?)),
        }
    }

    /// Write without metamethods; assigning nil removes the entry.
    pub fn raw_set(&self, table: TableRef, key: Value, value: Value) -> Result<(), ScriptError> {
        let key = Key::from_value(&key)?;
        self.inner.borrow_mut().table_mut(table)?.set(key, value);
        Ok(())
    }

    pub fn get_field(&self, table: TableRef, name: &str) -> Result<Value, ScriptError> {
        self.raw_get(table, &Value::from(name))
    }

    pub fn set_field(&self, table: TableRef, name: &str, value: Value) -> Result<(), ScriptError> {
        self.raw_set(table, Value::from(name), value)
    }

    /// Length of the sequence part.
    pub fn raw_len(&self, table: TableRef) -> Result<usize, ScriptError> {
        Ok(self.inner.borrow().table(table)?.len())
    }

    /// The entry after `key`, or the first entry for nil.
    pub fn next(&self, table: TableRef, key: &Value) -> Result<Option<(Value, Value)>, ScriptError> {
        let inner = self.inner.borrow();
        let table = inner.table(table)?;
        let after = match key {
            Value::Nil => None,
            other => Some(Key::from_value(other)?),
        };
        Ok(table.next(after.as_ref()).map(|(k, v)| (k.to_value(), v)))
    }

    /// Snapshot of every entry in iteration order.
    pub fn pairs(&self, table: TableRef) -> Result<Vec<(Value, Value)>, ScriptError> {
        let mut out = Vec::new();
        let mut key = Value::Nil;
        while let Some((k, v)) = self.next(table, &key)? {
            out.push((k.clone(), v));
            key = k;
        }
        Ok(out)
    }

    /// Attach a finalizer, called with the table when it becomes unreachable.
    pub fn set_finalizer(&self, table: TableRef, finalizer: FunctionRef) -> Result<(), ScriptError> {
        self.inner.borrow_mut().table_mut(table)?.finalizer = Some(finalizer);
        Ok(())
    }

    pub fn has_finalizer(&self, table: TableRef) -> bool {
        self.inner
            .borrow()
            .tables
            .get(table)
            .is_some_and(|t| t.finalizer.is_some())
    }

    /// Check whether a table or function handle is still live.
    pub fn is_alive(&self, value: &Value) -> bool {
        let inner = self.inner.borrow();
        match value {
            Value::Table(t) => inner.tables.get(*t).is_some(),
            Value::Function(f) => inner.functions.get(*f).is_some(),
            _ => true,
        }
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Create a function from native code.
    pub fn create_function<F>(&self, f: F) -> FunctionRef
    where
        F: NativeCallable + 'static,
    {
        self.create_closure(f, Vec::new())
    }

    /// Create a function capturing upvalues.
    pub fn create_closure<F>(&self, f: F, upvalues: Vec<Value>) -> FunctionRef
    where
        F: NativeCallable + 'static,
    {
        self.inner.borrow_mut().functions.allocate(Closure {
            func: NativeFn::new(f),
            upvalues,
        })
    }

    pub(crate) fn upvalue(&self, function: FunctionRef, index: usize) -> Value {
        self.inner
            .borrow()
            .functions
            .get(function)
            .and_then(|c| c.upvalues.get(index).cloned())
            .unwrap_or_default()
    }

    /// Protected call.
    ///
    /// Calls the function below the top `nargs` values. On success the
    /// function and arguments are replaced by `nresults` results (all of
    /// them for `None`) and the count is returned. On failure the function
    /// and arguments are removed and the error is returned; the caller's
    /// part of the stack is untouched either way.
    pub fn pcall(&self, nargs: usize, nresults: Option<usize>) -> Result<usize, ScriptError> {
        let (func_pos, function, callable) = {
            let inner = self.inner.borrow();
            let available = inner.stack.len() - inner.base();
            if available < nargs + 1 {
                return Err(ScriptError::StackUnderflow {
                    needed: nargs + 1,
                    available,
                });
            }
            let func_pos = inner.stack.len() - nargs - 1;
            let function = match &inner.stack[func_pos] {
                Value::Function(f) => *f,
                other => return Err(ScriptError::NotCallable(other.type_name())),
            };
            let callable = inner
                .functions
                .get(function)
                .map(|c| c.func.clone())
                .ok_or(ScriptError::StaleHandle("function"))?;
            (func_pos, function, callable)
        };

        self.inner.borrow_mut().frames.push(func_pos + 1);
        let outcome = {
            let mut ctx = CallContext::new(self, function, nargs);
            callable.call(&mut ctx)
        };

        let mut inner = self.inner.borrow_mut();
        inner.frames.pop();
        let count = match outcome {
            Ok(count) => count,
            Err(error) => {
                inner.stack.truncate(func_pos);
                return Err(error);
            }
        };
        let len = inner.stack.len();
        let produced = len.saturating_sub(func_pos + 1);
        if count > produced {
            inner.stack.truncate(func_pos);
            return Err(ScriptError::StackUnderflow {
                needed: count,
                available: produced,
            });
        }
        let results: Vec<Value> = inner.stack.drain(len - count..).collect();
        inner.stack.truncate(func_pos);
        let wanted = nresults.unwrap_or(count);
        inner
            .stack
            .extend(results.into_iter().chain(iter::repeat(Value::Nil)).take(wanted));
        Ok(wanted)
    }

    /// Call a function value with arguments and collect every result.
    pub fn call_function(&self, function: &Value, args: &[Value]) -> Result<Vec<Value>, ScriptError> {
        let top = self.top();
        self.push(function.clone());
        for arg in args {
            self.push(arg.clone());
        }
        let count = self.pcall(args.len(), None)?;
        let mut inner = self.inner.borrow_mut();
        let len = inner.stack.len();
        let results = inner.stack.drain(len - count..).collect();
        let keep = inner.base() + top;
        inner.stack.truncate(keep);
        Ok(results)
    }

    // ========================================================================
    // Registry and globals
    // ========================================================================

    /// Store a value in the registry, keeping it alive until released.
    pub fn reference(&self, value: Value) -> RegistryRef {
        if value.is_nil() {
            return RegistryRef::NIL;
        }
        let mut inner = self.inner.borrow_mut();
        match inner.registry_free.pop() {
            Some(slot) => {
                inner.registry[slot as usize] = Some(value);
                RegistryRef(slot)
            }
            None => {
                inner.registry.push(Some(value));
                RegistryRef(inner.registry.len() as i32 - 1)
            }
        }
    }

    /// Release a registry reference. Releasing twice is an error.
    pub fn unreference(&self, reference: RegistryRef) -> Result<(), ScriptError> {
        if reference == RegistryRef::NIL {
            return Ok(());
        }
        let index = usize::try_from(reference.0)
            .map_err(|_| ScriptError::InvalidReference(reference.0))?;
        let mut inner = self.inner.borrow_mut();
        match inner.registry.get_mut(index) {
            Some(slot) if slot.is_some() => *slot = None,
            _ => return Err(ScriptError::InvalidReference(reference.0)),
        }
        inner.registry_free.push(reference.0);
        Ok(())
    }

    /// Resolve a registry reference.
    pub fn registry_value(&self, reference: RegistryRef) -> Result<Value, ScriptError> {
        if reference == RegistryRef::NIL {
            return Ok(Value::Nil);
        }
        let inner = self.inner.borrow();
        if reference.0 < 0 {
            return Err(ScriptError::InvalidReference(reference.0));
        }
        inner
            .registry
            .get(reference.0 as usize)
            .cloned()
            .flatten()
            .ok_or(ScriptError::InvalidReference(reference.0))
    }

    /// Number of live registry entries.
    pub fn registry_len(&self) -> usize {
        let inner = self.inner.borrow();
        inner.registry.len() - inner.registry_free.len()
    }

    /// The globals table.
    pub fn globals(&self) -> TableRef {
        self.inner.borrow().globals
    }

    pub fn set_global(&self, name: &str, value: Value) -> Result<(), ScriptError> {
        self.set_field(self.globals(), name, value)
    }

    pub fn global(&self, name: &str) -> Value {
        self.get_field(self.globals(), name).unwrap_or_default()
    }

    // ========================================================================
    // Collector
    // ========================================================================

    /// Number of live tables, including globals.
    pub fn table_count(&self) -> usize {
        self.inner.borrow().tables.len()
    }

    /// Number of live functions.
    pub fn function_count(&self) -> usize {
        self.inner.borrow().functions.len()
    }

    /// Run one full mark-and-sweep cycle.
    ///
    /// Roots are the stack, the registry and the globals table. An
    /// unreachable table with a finalizer survives this cycle, has its
    /// finalizer detached and then called with the table as its only
    /// argument; it is reclaimed by a later cycle if still unreachable.
    /// Finalizer errors are logged and dropped.
    pub fn collect(&self) -> CollectStats {
        let (pending, mut stats) = {
            let mut inner = self.inner.borrow_mut();
            let mut roots: Vec<Value> = inner.stack.clone();
            roots.extend(inner.registry.iter().flatten().cloned());
            roots.push(Value::Table(inner.globals));
            inner.mark(roots);

            let mut pending = Vec::new();
            for table in inner.tables.unmarked() {
                if let Some(finalizer) = inner.tables.get_mut(table).and_then(|t| t.finalizer.take()) {
                    pending.push((table, finalizer));
                }
            }
            let resurrected = pending
                .iter()
                .flat_map(|(t, f)| [Value::Table(*t), Value::Function(*f)])
                .collect();
            inner.mark(resurrected);

            let stats = CollectStats {
                tables_freed: inner.tables.sweep(),
                functions_freed: inner.functions.sweep(),
                finalized: 0,
            };
            (pending, stats)
        };

        for (table, finalizer) in pending {
            self.push(Value::Function(finalizer));
            self.push(Value::Table(table));
            if let Err(error) = self.pcall(1, Some(0)) {
                warn!(%error, "finalizer failed");
            }
            stats.finalized += 1;
        }
        debug!(
            tables = stats.tables_freed,
            functions = stats.functions_freed,
            finalized = stats.finalized,
            "collected"
        );
        stats
    }
}

impl Default for ScriptState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScriptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ScriptState")
            .field("stack", &inner.stack.len())
            .field("tables", &inner.tables)
            .field("functions", &inner.functions)
            .finish()
    }
}
