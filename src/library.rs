//! Library instances: registered components, event tables and process wide defaults.

use crate::component::{default_components, Component, ComponentInfo};
use crate::consts::*;
use crate::events::preset::{self, parse_definitions, BUILTIN_DEFINITIONS, PRESET_TABLE};
use crate::events::{Definition, Derived, EnumModifier, EventCode, EventInfo, EventKind, EventTable};
use crate::eventset::{Clock, EventSet, RealClock};
use crate::{Config, Error, Result};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::ThreadId;

lazy_static! {
    /// Instance shared by the whole process.
    static ref GLOBAL: RwLock<Option<Library>> = RwLock::new(None);
}

/// An event resolved into natives of one component.
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub(crate) cidx: usize,
    pub(crate) natives: Vec<u32>,
    pub(crate) derived: Derived,
}

#[derive(Debug)]
struct Shared {
    config: Config,
    components: Vec<Box<dyn Component>>,
    events: EventTable,
    clock: Arc<dyn Clock>,
    hz: f64,
    next_eventset: AtomicUsize,
    multiplex_init: AtomicBool,
    /// `(thread, component)` pairs with a running EventSet.
    running: Mutex<HashSet<(ThreadId, usize)>>,
    threads: Mutex<HashMap<ThreadId, i32>>,
    defaults: Mutex<(Option<Domain>, Option<Granularity>)>,
}

/// Builder for a [`Library`].
#[derive(Debug, Default)]
pub struct LibraryBuilder {
    config: Option<Config>,
    components: Option<Vec<Box<dyn Component>>>,
    extra_components: Vec<Box<dyn Component>>,
    disabled: Vec<String>,
    definitions: Vec<String>,
    files: Vec<PathBuf>,
    clock: Option<Arc<dyn Clock>>,
}

impl LibraryBuilder {
    /// Use `config` instead of the default configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Register `components` instead of the default ones.
    pub fn components(mut self, components: Vec<Box<dyn Component>>) -> Self {
        self.components = Some(components);
        self
    }

    /// Register one more component after the others.
    pub fn component(mut self, component: Box<dyn Component>) -> Self {
        self.extra_components.push(component);
        self
    }

    /// Do not initialise the component called `name`.
    pub fn disable_component(mut self, name: &str) -> Self {
        self.disabled.push(name.into());
        self
    }

    /// Add preset and user event definitions in the `papi_events.csv` format.
    pub fn event_definitions(mut self, text: &str) -> Self {
        self.definitions.push(text.into());
        self
    }

    /// Add the definitions of the `papi_events.csv` formatted file at `path`.
    ///
    /// Read when the library is built, after the file named by the configuration.
    pub fn events_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    /// Clock used by software multiplexing.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Initialise the components and resolve the event definitions.
    pub fn build(self) -> Result<Library> {
        let config = self.config.unwrap_or_default();
        let mut components = match self.components {
            Some(c) => c,
            None => default_components(&config),
        };
        components.extend(self.extra_components);
        if components.len() > MAX_COMPONENTS {
            return Err(Error::Count);
        }

        for (cidx, cmp) in components.iter_mut().enumerate() {
            cmp.info_mut().cmp_index = cidx;
            let name = cmp.info().name.clone();
            if config.disabled_components.contains(&name) || self.disabled.contains(&name) {
                info!("Component {} disabled by the user", name);
                cmp.info_mut().disabled = Some("Disabled by user".into());
                continue;
            }
            match cmp.init_component(cidx) {
                Ok(()) => debug!(
                    "Component {} ready with {} natives",
                    name,
                    cmp.num_native_events()
                ),
                Err(e) => {
                    warn!("Component {} disabled: {}", name, e);
                    cmp.info_mut().disabled = Some(e.to_string());
                }
            }
        }

        let mut defs = parse_definitions(BUILTIN_DEFINITIONS.as_bytes())?;
        if let Some(path) = config.events_file.as_ref() {
            defs.extend(parse_definitions(std::fs::File::open(path)?)?);
        }
        for path in self.files.iter() {
            debug!("Reading event definitions from {}", path.display());
            defs.extend(parse_definitions(std::fs::File::open(path)?)?);
        }
        for text in self.definitions.iter() {
            defs.extend(parse_definitions(text.as_bytes())?);
        }
        let events = EventTable::build(&components, &defs);
        for (cidx, cmp) in components.iter_mut().enumerate() {
            cmp.info_mut().num_preset_events = events.presets_on(cidx);
        }

        Ok(Library {
            shared: Arc::new(Shared {
                config,
                components,
                events,
                clock: self.clock.unwrap_or_else(|| Arc::new(RealClock)),
                hz: crate::sysinfo::cpu_mhz() * 1e6,
                next_eventset: AtomicUsize::new(0),
                multiplex_init: AtomicBool::new(false),
                running: Mutex::new(HashSet::new()),
                threads: Mutex::new(HashMap::new()),
                defaults: Mutex::new((None, None)),
            }),
        })
    }
}

/// A set of components and the events they provide.
///
/// Cloning is cheap, clones share the same state.
#[derive(Debug, Clone)]
pub struct Library {
    shared: Arc<Shared>,
}

impl Library {
    /// Library configured from the environment with the default components.
    pub fn init() -> Result<Library> {
        Library::builder().config(Config::from_env()?).build()
    }

    /// Builder for an explicitly configured library.
    pub fn builder() -> LibraryBuilder {
        LibraryBuilder::default()
    }

    /// Version of the library.
    pub fn version(&self) -> Version {
        Version::CURRENT
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Clock rate used by derived events, in Hz.
    pub fn hz(&self) -> f64 {
        self.shared.hz
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.shared.clock.clone()
    }

    /// Number of registered components, enabled or not.
    pub fn num_components(&self) -> usize {
        self.shared.components.len()
    }

    /// Information about component `cidx`.
    pub fn component_info(&self, cidx: usize) -> Result<&ComponentInfo> {
        self.shared
            .components
            .get(cidx)
            .map(|c| c.info())
            .ok_or(Error::NoComponent)
    }

    /// Index of the component called `name`.
    pub fn component_index(&self, name: &str) -> Result<usize> {
        self.shared
            .components
            .iter()
            .position(|c| c.info().name == name)
            .ok_or(Error::NoComponent)
    }

    /// Number of counters of component `cidx`, `0` if it is disabled.
    pub fn num_hwctrs(&self, cidx: usize) -> Result<usize> {
        let info = self.component_info(cidx)?;
        Ok(if info.disabled.is_some() {
            0
        } else {
            info.num_cntrs
        })
    }

    /// Number of counters of the CPU component.
    pub fn num_counters(&self) -> usize {
        self.num_hwctrs(0).unwrap_or(0)
    }

    /// Enabled component `cidx`.
    pub(crate) fn _component(&self, cidx: usize) -> Result<&dyn Component> {
        let cmp = self.shared.components.get(cidx).ok_or(Error::NoComponent)?;
        if cmp.info().disabled.is_some() {
            return Err(Error::NoComponent);
        }
        Ok(cmp.as_ref())
    }

    fn _enabled(&self) -> impl Iterator<Item = (usize, &Box<dyn Component>)> {
        self.shared
            .components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.info().disabled.is_none())
    }

    pub(crate) fn _running(&self) -> Result<MutexGuard<HashSet<(ThreadId, usize)>>> {
        self.shared.running.lock().map_err(|_| Error::Bug)
    }

    pub(crate) fn _defaults(&self) -> Result<(Option<Domain>, Option<Granularity>)> {
        Ok(*self.shared.defaults.lock().map_err(|_| Error::Bug)?)
    }

    /// Create an empty EventSet.
    pub fn create_eventset(&self) -> EventSet {
        let id = self.shared.next_eventset.fetch_add(1, Ordering::SeqCst);
        debug!("Created EventSet {}", id);
        EventSet::new(self.clone(), id)
    }

    /// Allow EventSets to be multiplexed.
    pub fn multiplex_init(&self) -> Result<()> {
        self.shared.multiplex_init.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether [`Library::multiplex_init`] was called.
    pub fn is_multiplex_initialized(&self) -> bool {
        self.shared.multiplex_init.load(Ordering::SeqCst)
    }

    /// Default counting domain of EventSets assigned to a component from now on.
    ///
    /// Components that do not support `domain` keep their own default.
    pub fn set_domain(&self, domain: Domain) -> Result<()> {
        if domain.is_empty() || !Domain::ALL.contains(domain) {
            return Err(Error::Invalid);
        }
        self.shared.defaults.lock().map_err(|_| Error::Bug)?.0 = Some(domain);
        Ok(())
    }

    /// Default counting domain, that of the CPU component unless changed.
    pub fn domain(&self) -> Domain {
        match self._defaults() {
            Ok((Some(d), _)) => d,
            _ => self
                .component_info(0)
                .map(|i| i.default_domain)
                .unwrap_or(Domain::USER),
        }
    }

    /// Default counting granularity of EventSets assigned to a component from now on.
    pub fn set_granularity(&self, granularity: Granularity) -> Result<()> {
        let all = Granularity::THR
            | Granularity::PROC
            | Granularity::PROCG
            | Granularity::SYS
            | Granularity::SYS_CPU;
        if granularity.is_empty() || !all.contains(granularity) {
            return Err(Error::Invalid);
        }
        self.shared.defaults.lock().map_err(|_| Error::Bug)?.1 = Some(granularity);
        Ok(())
    }

    /// Default counting granularity, that of the CPU component unless changed.
    pub fn granularity(&self) -> Granularity {
        match self._defaults() {
            Ok((_, Some(g))) => g,
            _ => self
                .component_info(0)
                .map(|i| i.default_granularity)
                .unwrap_or(Granularity::THR),
        }
    }

    /// Kernel id of the calling thread.
    pub fn thread_id(&self) -> i32 {
        nix::unistd::gettid().as_raw()
    }

    /// Record the calling thread.
    pub fn register_thread(&self) -> Result<()> {
        let tid = self.thread_id();
        self.shared
            .threads
            .lock()
            .map_err(|_| Error::Bug)?
            .insert(std::thread::current().id(), tid);
        debug!("Registered thread {}", tid);
        Ok(())
    }

    /// Forget the calling thread.
    pub fn unregister_thread(&self) -> Result<()> {
        self.shared
            .threads
            .lock()
            .map_err(|_| Error::Bug)?
            .remove(&std::thread::current().id())
            .map(|_| ())
            .ok_or(Error::Invalid)
    }

    /// Kernel ids of the registered threads.
    pub fn list_threads(&self) -> Result<Vec<i32>> {
        let mut tids: Vec<i32> = self
            .shared
            .threads
            .lock()
            .map_err(|_| Error::Bug)?
            .values()
            .copied()
            .collect();
        tids.sort();
        Ok(tids)
    }

    /// Release the resources held by the components.
    pub fn shutdown(&self) {
        for (_, cmp) in self._enabled() {
            cmp.shutdown();
        }
        info!("Library shut down");
    }

    /// Definition of a preset or user event code.
    fn _definition(&self, code: EventCode) -> Result<Option<&Definition>> {
        let idx = code.index() as usize;
        match code.kind() {
            EventKind::Preset if idx < preset::num_presets() => Ok(self.shared.events.preset(idx)),
            EventKind::Preset => Err(Error::NotPreset),
            EventKind::User => Ok(Some(self.shared.events.user(idx).ok_or(Error::NoEvent)?)),
            _ => Err(Error::NoEvent),
        }
    }

    /// Component and natives an event is counted with.
    pub(crate) fn _resolve(&self, code: EventCode) -> Result<Resolved> {
        match code.kind() {
            EventKind::Native => {
                let cidx = code.component().ok_or(Error::NoEvent)?;
                let cmp = self._component(cidx).map_err(|_| Error::NoEvent)?;
                if code.index() as usize >= cmp.num_native_events() {
                    return Err(Error::NoEvent);
                }
                Ok(Resolved {
                    cidx,
                    natives: vec![code.index()],
                    derived: Derived::default(),
                })
            }
            EventKind::Preset | EventKind::User => {
                let def = self
                    ._definition(code)
                    .map_err(|_| Error::NoEvent)?
                    .ok_or(Error::NoEvent)?;
                Ok(Resolved {
                    cidx: def.cidx,
                    natives: def.natives.clone(),
                    derived: def.derived.clone(),
                })
            }
            EventKind::Invalid => Err(Error::NoEvent),
        }
    }

    /// Code of the event called `name`.
    ///
    /// Natives can be qualified with their component, as in `perf_event:::PERF_COUNT_HW_CPU_CYCLES`.
    pub fn event_name_to_code(&self, name: &str) -> Result<EventCode> {
        if let Some(idx) = preset::preset_index(name) {
            return Ok(EventCode::preset(idx as u32));
        }
        if let Some(idx) = self.shared.events.user_index(name) {
            return Ok(EventCode::user(idx as u32));
        }
        let (prefix, native) = match name.find(":::") {
            Some(p) => (Some(&name[..p]), &name[p + 3..]),
            None => (None, name),
        };
        self._enabled()
            .filter(|(_, c)| {
                prefix
                    .map(|p| c.info().name == p || c.info().short_name == p)
                    .unwrap_or(true)
            })
            .find_map(|(cidx, c)| {
                c.name_to_native(native)
                    .ok()
                    .map(|n| EventCode::native(cidx, n))
            })
            .ok_or(Error::NoEvent)
    }

    /// Name of the event with code `code`.
    pub fn event_code_to_name(&self, code: EventCode) -> Result<String> {
        Ok(self.event_info(code)?.symbol)
    }

    /// Description of the event with code `code`.
    pub fn event_info(&self, code: EventCode) -> Result<EventInfo> {
        match code.kind() {
            EventKind::Native => {
                let cidx = code.component().ok_or(Error::NoEvent)?;
                let cmp = self._component(cidx).map_err(|_| Error::NoEvent)?;
                let native = cmp.native_info(code.index())?;
                Ok(EventInfo {
                    code,
                    symbol: native.symbol.clone(),
                    short_descr: native.symbol.clone(),
                    long_descr: native.description,
                    units: native.units,
                    component: Some(cidx),
                    count: 1,
                    derived: None,
                    postfix: None,
                    native_codes: vec![code],
                    native_names: vec![native.symbol],
                    data_type: native.data_type,
                    writable: native.writable,
                })
            }
            EventKind::Preset | EventKind::User => {
                let def = self._definition(code)?;
                let mut info = match code.kind() {
                    EventKind::Preset => {
                        let (symbol, short, long) = PRESET_TABLE[code.index() as usize];
                        EventInfo {
                            code,
                            symbol: symbol.into(),
                            short_descr: short.into(),
                            long_descr: long.into(),
                            ..EventInfo::default()
                        }
                    }
                    _ => EventInfo {
                        code,
                        symbol: def.map(|d| d.symbol.clone()).unwrap_or_default(),
                        short_descr: "User defined event".into(),
                        long_descr: "User defined event".into(),
                        ..EventInfo::default()
                    },
                };
                if let Some(def) = def {
                    let first = self
                        ._component(def.cidx)?
                        .native_info(*def.natives.first().ok_or(Error::Bug)?)?;
                    info.component = Some(def.cidx);
                    info.count = def.natives.len();
                    info.derived = Some(def.derived.kind);
                    info.postfix = def.derived.formula.as_ref().map(|f| f.to_postfix());
                    info.native_codes = def
                        .natives
                        .iter()
                        .map(|n| EventCode::native(def.cidx, *n))
                        .collect();
                    info.native_names = def.native_names.clone();
                    info.units = first.units;
                    info.data_type = first.data_type;
                }
                Ok(info)
            }
            EventKind::Invalid => Err(Error::NoEvent),
        }
    }

    /// Check that the event with code `code` can be counted on this system.
    pub fn query_event(&self, code: EventCode) -> Result<()> {
        match code.kind() {
            EventKind::Preset | EventKind::User => {
                self._definition(code)?.ok_or(Error::NoEvent)?;
                Ok(())
            }
            _ => self._resolve(code).map(|_| ()),
        }
    }

    /// Check that the event called `name` can be counted on this system.
    pub fn query_named_event(&self, name: &str) -> Result<()> {
        self.query_event(self.event_name_to_code(name)?)
    }

    /// Walk the events of the family `code` belongs to.
    ///
    /// Natives are enumerated per component: start from `EventCode::native(cidx, 0)` with
    /// [`EnumModifier::First`]. Returns `Error::NoEvent` past the last event.
    pub fn enum_event(&self, code: EventCode, modifier: EnumModifier) -> Result<EventCode> {
        let start = match modifier {
            EnumModifier::First => 0,
            _ => code.index() as usize + 1,
        };
        match code.kind() {
            EventKind::Preset => (start..preset::num_presets())
                .find(|&i| {
                    modifier != EnumModifier::Available || self.shared.events.preset(i).is_some()
                })
                .map(|i| EventCode::preset(i as u32))
                .ok_or(Error::NoEvent),
            EventKind::User => {
                if start < self.shared.events.num_user() {
                    Ok(EventCode::user(start as u32))
                } else {
                    Err(Error::NoEvent)
                }
            }
            EventKind::Native => {
                let cidx = code.component().ok_or(Error::Invalid)?;
                let cmp = self._component(cidx)?;
                if start < cmp.num_native_events() {
                    Ok(EventCode::native(cidx, start as u32))
                } else {
                    Err(Error::NoEvent)
                }
            }
            EventKind::Invalid => Err(Error::Invalid),
        }
    }
}

/// Initialise the process wide library from the environment.
///
/// Later calls return the instance created by the first one.
pub fn library_init() -> Result<Library> {
    library_init_with(Library::builder().config(Config::from_env()?))
}

/// Initialise the process wide library with `builder`, unless it already exists.
pub fn library_init_with(builder: LibraryBuilder) -> Result<Library> {
    if let Ok(lib) = library() {
        return Ok(lib);
    }
    let mut global = GLOBAL.write().map_err(|_| Error::Bug)?;
    if let Some(lib) = global.as_ref() {
        return Ok(lib.clone());
    }
    let lib = builder.build()?;
    *global = Some(lib.clone());
    info!("PAPI {} initialised", Version::CURRENT);
    Ok(lib)
}

/// The process wide library.
pub fn library() -> Result<Library> {
    GLOBAL
        .read()
        .map_err(|_| Error::Bug)?
        .clone()
        .ok_or(Error::NotInitialized)
}

/// Whether the process wide library exists.
pub fn is_initialized() -> bool {
    library().is_ok()
}

/// Shut the process wide library down. EventSets already created keep working.
pub fn shutdown() {
    let lib = match GLOBAL.write() {
        Ok(mut global) => global.take(),
        Err(_) => None,
    };
    if let Some(lib) = lib {
        lib.shutdown();
    }
}

/// Definitions mapping a few presets onto the example component.
#[cfg(test)]
pub(crate) const TEST_DEFINITIONS: &str = "CPU,example\n\
    PRESET,PAPI_TOT_CYC,NOT_DERIVED,EXAMPLE_CONSTANT\n\
    PRESET,PAPI_FP_INS,NOT_DERIVED,EXAMPLE_CONSTANT\n\
    PRESET,PAPI_FP_OPS,NOT_DERIVED,EXAMPLE_CONSTANT\n\
    PRESET,PAPI_TOT_INS,NOT_DERIVED,EXAMPLE_AUTOINC\n\
    PRESET,PAPI_L1_DCM,NOT_DERIVED,EXAMPLE_ZERO\n\
    EVENT,EX_TWICE,DERIVED_POSTFIX,N0|N0|+|,EXAMPLE_CONSTANT\n";

/// Process wide library over the example component, shared by every test touching globals.
#[cfg(test)]
pub(crate) fn test_global() -> Library {
    library_init_with(
        Library::builder()
            .components(vec![Box::new(
                crate::component::example::ExampleComponent::default(),
            )])
            .event_definitions(TEST_DEFINITIONS),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::example::ExampleComponent;
    use crate::component::net::NetComponent;

    fn _lib() -> Library {
        let _ = env_logger::try_init();
        Library::builder()
            .components(vec![
                Box::new(ExampleComponent::default()),
                Box::new(NetComponent::with_path("/nonexistent/net/dev")),
            ])
            .event_definitions(TEST_DEFINITIONS)
            .build()
            .unwrap()
    }

    #[test]
    fn test_components() {
        let lib = _lib();
        assert_eq!(lib.version(), Version::CURRENT);
        assert_eq!(lib.num_components(), 2);
        assert_eq!(lib.component_index("net").unwrap(), 1);
        assert!(lib.component_index("cuda").is_err());
        assert!(lib.component_info(1).unwrap().disabled.is_some());
        assert_eq!(lib.component_info(0).unwrap().cmp_index, 0);
        assert_eq!(lib.component_info(0).unwrap().num_preset_events, 5);
        assert_eq!(lib.num_hwctrs(0).unwrap(), 3);
        assert_eq!(lib.num_hwctrs(1).unwrap(), 0);
        assert_eq!(lib.num_hwctrs(2).unwrap_err().code(), Error::NoComponent.code());
        assert_eq!(lib.num_counters(), 3);
    }

    #[test]
    fn test_disable_component() {
        let lib = Library::builder()
            .components(vec![Box::new(ExampleComponent::default())])
            .disable_component("example")
            .build()
            .unwrap();
        assert_eq!(
            lib.component_info(0).unwrap().disabled.as_ref().unwrap(),
            "Disabled by user"
        );
        assert_eq!(lib.num_counters(), 0);
        assert!(lib.event_name_to_code("EXAMPLE_ZERO").is_err());
        let mut set = lib.create_eventset();
        assert_eq!(set.assign_component(0).unwrap_err().code(), Error::NoComponent.code());
    }

    #[test]
    fn test_name_lookup() {
        let lib = _lib();
        let tot_cyc = lib.event_name_to_code("PAPI_TOT_CYC").unwrap();
        assert_eq!(tot_cyc, preset::TOT_CYC);
        // Standard presets have codes even when unavailable.
        assert_eq!(lib.event_name_to_code("PAPI_L2_DCM").unwrap(), preset::L2_DCM);
        assert_eq!(lib.event_name_to_code("EX_TWICE").unwrap(), EventCode::user(0));
        let native = lib.event_name_to_code("EXAMPLE_AUTOINC").unwrap();
        assert_eq!(native, EventCode::native(0, 2));
        assert_eq!(
            lib.event_name_to_code("example:::EXAMPLE_AUTOINC").unwrap(),
            native
        );
        assert!(lib.event_name_to_code("net:::EXAMPLE_AUTOINC").is_err());
        assert_eq!(
            lib.event_name_to_code("NOPE").unwrap_err().code(),
            Error::NoEvent.code()
        );
        assert_eq!(lib.event_code_to_name(native).unwrap(), "EXAMPLE_AUTOINC");
        assert_eq!(lib.event_code_to_name(tot_cyc).unwrap(), "PAPI_TOT_CYC");
        assert_eq!(
            lib.event_code_to_name(EventCode::preset(500)).unwrap_err().code(),
            Error::NotPreset.code()
        );
    }

    #[test]
    fn test_event_info_and_query() {
        let lib = _lib();
        let info = lib.event_info(preset::TOT_CYC).unwrap();
        assert_eq!(info.short_descr, "Total cycles");
        assert_eq!(info.count, 1);
        assert_eq!(info.native_names, vec!["EXAMPLE_CONSTANT"]);
        assert_eq!(info.native_codes, vec![EventCode::native(0, 1)]);
        let missing = lib.event_info(preset::L2_DCM).unwrap();
        assert_eq!(missing.count, 0);
        assert_eq!(missing.component, None);
        let user = lib.event_info(EventCode::user(0)).unwrap();
        assert_eq!(user.symbol, "EX_TWICE");
        assert_eq!(user.postfix.as_ref().unwrap(), "N0|N0|+|");
        assert!(lib.event_info(EventCode::user(9)).is_err());

        lib.query_event(preset::TOT_CYC).unwrap();
        lib.query_named_event("EXAMPLE_ZERO").unwrap();
        assert_eq!(
            lib.query_event(preset::L2_DCM).unwrap_err().code(),
            Error::NoEvent.code()
        );
        assert!(lib.query_named_event("PAPI_NOPE").is_err());
        assert!(lib.query_event(EventCode::native(1, 0)).is_err());
    }

    #[test]
    fn test_enumeration() {
        let lib = _lib();
        let mut code = lib
            .enum_event(EventCode::preset(0), EnumModifier::First)
            .unwrap();
        assert_eq!(code, preset::L1_DCM);
        let mut all = 1;
        while let Ok(next) = lib.enum_event(code, EnumModifier::All) {
            code = next;
            all += 1;
        }
        assert_eq!(all, preset::num_presets());

        let mut available = vec![];
        let mut code = EventCode::preset(0);
        if lib.query_event(code).is_ok() {
            available.push(code);
        }
        while let Ok(next) = lib.enum_event(code, EnumModifier::Available) {
            available.push(next);
            code = next;
        }
        assert_eq!(
            available,
            vec![preset::L1_DCM, preset::TOT_INS, preset::FP_INS, preset::TOT_CYC, preset::FP_OPS]
        );

        let mut natives = vec![lib
            .enum_event(EventCode::native(0, 0), EnumModifier::First)
            .unwrap()];
        while let Ok(next) = lib.enum_event(*natives.last().unwrap(), EnumModifier::All) {
            natives.push(next);
        }
        assert_eq!(natives.len(), 4);
        assert!(lib
            .enum_event(EventCode::native(1, 0), EnumModifier::First)
            .is_err());
        assert_eq!(
            lib.enum_event(EventCode::user(0), EnumModifier::First).unwrap(),
            EventCode::user(0)
        );
        assert!(lib.enum_event(EventCode::user(0), EnumModifier::All).is_err());
    }

    #[test]
    fn test_defaults_and_threads() {
        let lib = _lib();
        assert_eq!(lib.domain(), Domain::USER);
        assert!(lib.set_domain(Domain::default()).is_err());
        lib.set_domain(Domain::KERNEL).unwrap();
        assert_eq!(lib.domain(), Domain::KERNEL);
        assert_eq!(lib.granularity(), Granularity::THR);
        lib.set_granularity(Granularity::SYS).unwrap();
        assert_eq!(lib.granularity(), Granularity::SYS);
        assert!(!lib.is_multiplex_initialized());
        lib.multiplex_init().unwrap();
        assert!(lib.is_multiplex_initialized());

        assert!(lib.unregister_thread().is_err());
        lib.register_thread().unwrap();
        let lib2 = lib.clone();
        let other = std::thread::spawn(move || {
            lib2.register_thread().unwrap();
            lib2.thread_id()
        })
        .join()
        .unwrap();
        let threads = lib.list_threads().unwrap();
        assert_eq!(threads.len(), 2);
        assert!(threads.contains(&lib.thread_id()));
        assert!(threads.contains(&other));
        lib.unregister_thread().unwrap();
        assert_eq!(lib.list_threads().unwrap(), vec![other]);
    }

    #[test]
    fn test_events_file_from_config() {
        let path = std::env::temp_dir().join(format!("papi-events-{}.csv", std::process::id()));
        std::fs::write(&path, "CPU,example\nEVENT,FROM_FILE,NOT_DERIVED,EXAMPLE_ZERO\n").unwrap();
        let lib = Library::builder()
            .config(Config {
                events_file: Some(path.clone()),
                ..Config::default()
            })
            .components(vec![Box::new(ExampleComponent::default())])
            .build()
            .unwrap();
        lib.query_named_event("FROM_FILE").unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_events_file_from_builder() {
        let path = std::env::temp_dir().join(format!("papi-builder-{}.csv", std::process::id()));
        std::fs::write(&path, "CPU,example\nPRESET,PAPI_L2_DCM,NOT_DERIVED,EXAMPLE_ZERO\n").unwrap();
        let lib = Library::builder()
            .components(vec![Box::new(ExampleComponent::default())])
            .events_file(&path)
            .build()
            .unwrap();
        lib.query_event(preset::L2_DCM).unwrap();
        let _ = std::fs::remove_file(&path);

        let missing = Library::builder()
            .components(vec![Box::new(ExampleComponent::default())])
            .events_file(&path)
            .build();
        assert!(missing.is_err());
    }

    #[test]
    fn test_global_instance() {
        let lib = test_global();
        assert!(is_initialized());
        let again = library_init_with(Library::builder()).unwrap();
        assert_eq!(again.num_components(), lib.num_components());
        assert_eq!(library().unwrap().component_info(0).unwrap().name, "example");
    }
}
