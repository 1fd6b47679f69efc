//! Event codes, preset and user defined events.
//!
//! Every countable event is identified by an [`EventCode`]. Native events belong to exactly one
//! component. Presets and user defined events are recipes over natives of one component,
//! resolved when the library is initialised.

use crate::component::{Component, DataType};
use crate::consts::*;
use derive_more::{Display, From, Into};
use log::{debug, warn};

pub mod derived;
pub use derived::{Derived, DerivedKind, Formula, Rule};

pub mod preset;
pub use preset::EventDefinition;

/// Code identifying a preset, native or user defined event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Into, Display)]
#[display(fmt = "{:#010x}", _0)]
pub struct EventCode(pub u32);

/// Family an [`EventCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Standard preset.
    Preset,
    /// Native event of a component.
    Native,
    /// Event defined by the user.
    User,
    /// Malformed code.
    Invalid,
}

impl EventCode {
    /// Code of the standard preset with index `idx`.
    pub fn preset(idx: u32) -> Self {
        EventCode(PRESET_MASK | (idx & EVENT_INDEX_MASK))
    }

    /// Code of the native event `code` of component `cidx`.
    pub fn native(cidx: usize, code: u32) -> Self {
        EventCode(
            NATIVE_MASK
                | (((cidx as u32) << COMPONENT_SHIFT) & COMPONENT_MASK)
                | (code & EVENT_INDEX_MASK),
        )
    }

    /// Code of the user defined event with index `idx`.
    pub fn user(idx: u32) -> Self {
        EventCode(PRESET_MASK | NATIVE_MASK | (idx & EVENT_INDEX_MASK))
    }

    /// Family of this code.
    pub fn kind(self) -> EventKind {
        match (self.0 & PRESET_MASK != 0, self.0 & NATIVE_MASK != 0) {
            (true, true) => EventKind::User,
            (true, false) => EventKind::Preset,
            (false, true) => EventKind::Native,
            (false, false) => EventKind::Invalid,
        }
    }

    /// Index of the event inside its family (or component).
    pub fn index(self) -> u32 {
        self.0 & EVENT_INDEX_MASK
    }

    /// Component of a native code.
    pub fn component(self) -> Option<usize> {
        if self.kind() == EventKind::Native {
            Some(((self.0 & COMPONENT_MASK) >> COMPONENT_SHIFT) as usize)
        } else {
            None
        }
    }
}

/// Description of an event as reported by [`crate::Library::event_info`].
#[derive(Debug, Clone, Default)]
pub struct EventInfo {
    /// Code of the event.
    pub code: EventCode,
    /// Symbolic name.
    pub symbol: String,
    /// Short description.
    pub short_descr: String,
    /// Long description.
    pub long_descr: String,
    /// Units of the counted value.
    pub units: String,
    /// Component counting the event, if it is available.
    pub component: Option<usize>,
    /// Number of natives needed to count the event, `0` if unavailable.
    pub count: usize,
    /// Combination of the natives.
    pub derived: Option<DerivedKind>,
    /// Postfix formula of formula based events.
    pub postfix: Option<String>,
    /// Codes of the natives composing the event.
    pub native_codes: Vec<EventCode>,
    /// Names of the natives composing the event.
    pub native_names: Vec<String>,
    /// Interpretation of the counted value.
    pub data_type: DataType,
    /// Whether the event accepts writes.
    pub writable: bool,
}

impl Default for EventCode {
    fn default() -> Self {
        EventCode(0)
    }
}

/// Selects which events are visited by [`crate::Library::enum_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumModifier {
    /// The first event of the family.
    First,
    /// Every event of the family.
    All,
    /// Only events that can be counted on this system.
    Available,
}

/// A preset or user event resolved into natives of one component.
#[derive(Debug, Clone)]
pub(crate) struct Definition {
    pub(crate) symbol: String,
    pub(crate) cidx: usize,
    pub(crate) natives: Vec<u32>,
    pub(crate) native_names: Vec<String>,
    pub(crate) derived: Derived,
}

/// Presets and user defined events of a library instance.
#[derive(Debug, Default)]
pub(crate) struct EventTable {
    presets: Vec<Option<Definition>>,
    user: Vec<Definition>,
}

impl EventTable {
    /// Resolve `defs` against the enabled `components`.
    ///
    /// Later definitions of the same symbol replace earlier ones.
    pub(crate) fn build(components: &[Box<dyn Component>], defs: &[EventDefinition]) -> Self {
        let mut table = EventTable {
            presets: vec![None; preset::num_presets()],
            user: vec![],
        };
        for def in defs {
            let resolved = components
                .iter()
                .enumerate()
                .filter(|(_, c)| c.info().disabled.is_none())
                .filter(|(_, c)| def.sections.is_empty() || def.sections.contains(&c.info().name))
                .find_map(|(cidx, c)| {
                    let natives = def
                        .natives
                        .iter()
                        .map(|n| c.name_to_native(n))
                        .collect::<crate::Result<Vec<u32>>>()
                        .ok()?;
                    Some(Definition {
                        symbol: def.symbol.clone(),
                        cidx,
                        natives,
                        native_names: def.natives.clone(),
                        derived: Derived {
                            kind: def.kind,
                            formula: def.formula.clone(),
                        },
                    })
                });
            let resolved = match resolved {
                Some(r) => r,
                None => {
                    debug!("Event {} is not available on this system", def.symbol);
                    continue;
                }
            };
            match preset::preset_index(&def.symbol) {
                Some(idx) => table.presets[idx] = Some(resolved),
                None => {
                    if let Some(pos) = table.user.iter().position(|u| u.symbol == def.symbol) {
                        warn!("Redefinition of user event {}", def.symbol);
                        table.user[pos] = resolved;
                    } else {
                        table.user.push(resolved);
                    }
                }
            }
        }
        table
    }

    /// Resolved preset with index `idx`.
    pub(crate) fn preset(&self, idx: usize) -> Option<&Definition> {
        self.presets.get(idx).and_then(Option::as_ref)
    }

    /// User event with index `idx`.
    pub(crate) fn user(&self, idx: usize) -> Option<&Definition> {
        self.user.get(idx)
    }

    /// Number of user events.
    pub(crate) fn num_user(&self) -> usize {
        self.user.len()
    }

    /// Index of the user event called `symbol`.
    pub(crate) fn user_index(&self, symbol: &str) -> Option<usize> {
        self.user.iter().position(|u| u.symbol == symbol)
    }

    /// Number of presets resolved on component `cidx`.
    pub(crate) fn presets_on(&self, cidx: usize) -> usize {
        self.presets
            .iter()
            .filter(|p| p.as_ref().map(|d| d.cidx == cidx).unwrap_or(false))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::example::ExampleComponent;

    #[test]
    fn test_event_code_layout() {
        let n = EventCode::native(3, 17);
        assert_eq!(n.kind(), EventKind::Native);
        assert_eq!(n.component(), Some(3));
        assert_eq!(n.index(), 17);
        assert_eq!(EventCode::preset(59), preset::TOT_CYC);
        assert_eq!(preset::TOT_CYC.kind(), EventKind::Preset);
        assert_eq!(preset::TOT_CYC.component(), None);
        assert_eq!(EventCode::user(2).kind(), EventKind::User);
        assert_eq!(EventCode(0x1234).kind(), EventKind::Invalid);
        assert_eq!(format!("{}", preset::TOT_CYC), "0x8000003b");
    }

    #[test]
    fn test_table_resolves_against_components() {
        let components: Vec<Box<dyn Component>> = vec![Box::new(ExampleComponent::default())];
        let text = "CPU,example\n\
                    PRESET,PAPI_TOT_CYC,NOT_DERIVED,EXAMPLE_CONSTANT\n\
                    PRESET,PAPI_TOT_INS,NOT_DERIVED,EXAMPLE_MISSING\n\
                    EVENT,EX_SUM,DERIVED_ADD,EXAMPLE_CONSTANT,EXAMPLE_ZERO\n\
                    CPU,perf_event\n\
                    PRESET,PAPI_L1_DCM,NOT_DERIVED,EXAMPLE_ZERO\n";
        let defs = preset::parse_definitions(text.as_bytes()).unwrap();
        let table = EventTable::build(&components, &defs);
        assert_eq!(table.preset(59).unwrap().natives, vec![1]);
        assert!(table.preset(50).is_none());
        // Wrong section.
        assert!(table.preset(0).is_none());
        assert_eq!(table.num_user(), 1);
        assert_eq!(table.user_index("EX_SUM"), Some(0));
        assert_eq!(table.user(0).unwrap().natives, vec![1, 0]);
        assert_eq!(table.presets_on(0), 1);
    }
}
