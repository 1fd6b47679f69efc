//! The standard preset events and the parser for their definition files.
//!
//! Definition files follow the comma separated layout of PAPI's `papi_events.csv`:
//!
//! ```text
//! # comment
//! CPU,perf_event
//! PRESET,PAPI_TOT_CYC,NOT_DERIVED,PERF_COUNT_HW_CPU_CYCLES
//! PRESET,PAPI_FP_OPS,DERIVED_POSTFIX,N0|N1|+|,FP_ARITH:SCALAR,FP_ARITH:PACKED
//! ```
//!
//! `CPU` lines open a section that applies to the named components (consecutive `CPU` lines
//! accumulate). `EVENT` lines are accepted as a synonym of `PRESET` for user defined events.

use crate::events::derived::{DerivedKind, Formula};
use crate::events::EventCode;
use crate::{Error, Result};
use log::warn;
use std::io::{BufRead, BufReader};

macro_rules! presets {
    ($($name: ident = $idx: expr, $short: expr, $long: expr;)*) => {
        $(
            #[allow(missing_docs)]
            pub const $name: EventCode = EventCode(crate::consts::PRESET_MASK | $idx);
        )*

        /// `(symbol, short description, long description)` of every preset, by index.
        pub static PRESET_TABLE: &[(&str, &str, &str)] = &[
            $((concat!("PAPI_", stringify!($name)), $short, $long),)*
        ];
    };
}

presets! {
    L1_DCM = 0, "L1D cache misses", "Level 1 data cache misses";
    L1_ICM = 1, "L1I cache misses", "Level 1 instruction cache misses";
    L2_DCM = 2, "L2D cache misses", "Level 2 data cache misses";
    L2_ICM = 3, "L2I cache misses", "Level 2 instruction cache misses";
    L3_DCM = 4, "L3D cache misses", "Level 3 data cache misses";
    L3_ICM = 5, "L3I cache misses", "Level 3 instruction cache misses";
    L1_TCM = 6, "L1 cache misses", "Level 1 cache misses";
    L2_TCM = 7, "L2 cache misses", "Level 2 cache misses";
    L3_TCM = 8, "L3 cache misses", "Level 3 cache misses";
    CA_SNP = 9, "Snoop Requests", "Requests for a snoop";
    CA_SHR = 10, "Ex Acces shared CL", "Requests for exclusive access to shared cache line";
    CA_CLN = 11, "Ex Access clean CL", "Requests for exclusive access to clean cache line";
    CA_INV = 12, "Cache ln invalid", "Requests for cache line invalidation";
    CA_ITV = 13, "Cache ln intervene", "Requests for cache line intervention";
    L3_LDM = 14, "L3 load misses", "Level 3 load misses";
    L3_STM = 15, "L3 store misses", "Level 3 store misses";
    BRU_IDL = 16, "Branch idle cycles", "Cycles branch units are idle";
    FXU_IDL = 17, "IU idle cycles", "Cycles integer units are idle";
    FPU_IDL = 18, "FPU idle cycles", "Cycles floating point units are idle";
    LSU_IDL = 19, "L/SU idle cycles", "Cycles load/store units are idle";
    TLB_DM = 20, "Data TLB misses", "Data translation lookaside buffer misses";
    TLB_IM = 21, "Instr TLB misses", "Instruction translation lookaside buffer misses";
    TLB_TL = 22, "Total TLB misses", "Total translation lookaside buffer misses";
    L1_LDM = 23, "L1 load misses", "Level 1 load misses";
    L1_STM = 24, "L1 store misses", "Level 1 store misses";
    L2_LDM = 25, "L2 load misses", "Level 2 load misses";
    L2_STM = 26, "L2 store misses", "Level 2 store misses";
    BTAC_M = 27, "Br targt addr miss", "Branch target address cache misses";
    PRF_DM = 28, "Data prefetch miss", "Data prefetch cache misses";
    L3_DCH = 29, "L3D cache hits", "Level 3 data cache hits";
    TLB_SD = 30, "TLB shootdowns", "Translation lookaside buffer shootdowns";
    CSR_FAL = 31, "Failed store cond", "Failed store conditional instructions";
    CSR_SUC = 32, "Good store cond", "Successful store conditional instructions";
    CSR_TOT = 33, "Total store cond", "Total store conditional instructions";
    MEM_SCY = 34, "Stalled mem cycles", "Cycles Stalled Waiting for memory accesses";
    MEM_RCY = 35, "Stalled rd cycles", "Cycles Stalled Waiting for memory Reads";
    MEM_WCY = 36, "Stalled wr cycles", "Cycles Stalled Waiting for memory writes";
    STL_ICY = 37, "No instr issue", "Cycles with no instruction issue";
    FUL_ICY = 38, "Max instr issue", "Cycles with maximum instruction issue";
    STL_CCY = 39, "No instr done", "Cycles with no instructions completed";
    FUL_CCY = 40, "Max instr done", "Cycles with maximum instructions completed";
    HW_INT = 41, "Hdw interrupts", "Hardware interrupts";
    BR_UCN = 42, "Uncond branch", "Unconditional branch instructions";
    BR_CN = 43, "Cond branch", "Conditional branch instructions";
    BR_TKN = 44, "Cond branch taken", "Conditional branch instructions taken";
    BR_NTK = 45, "Cond br not taken", "Conditional branch instructions not taken";
    BR_MSP = 46, "Cond br mspredictd", "Conditional branch instructions mispredicted";
    BR_PRC = 47, "Cond br predicted", "Conditional branch instructions correctly predicted";
    FMA_INS = 48, "FMAs completed", "FMA instructions completed";
    TOT_IIS = 49, "Instr issued", "Instructions issued";
    TOT_INS = 50, "Instr completed", "Instructions completed";
    INT_INS = 51, "Int instructions", "Integer instructions";
    FP_INS = 52, "FP instructions", "Floating point instructions";
    LD_INS = 53, "Loads", "Load instructions";
    SR_INS = 54, "Stores", "Store instructions";
    BR_INS = 55, "Branches", "Branch instructions";
    VEC_INS = 56, "Vector/SIMD instr", "Vector/SIMD instructions (could include integer)";
    RES_STL = 57, "Stalled res cycles", "Cycles stalled on any resource";
    FP_STAL = 58, "Stalled FPU cycles", "Cycles the FP unit(s) are stalled";
    TOT_CYC = 59, "Total cycles", "Total cycles";
    LST_INS = 60, "L/S completed", "Load/store instructions completed";
    SYC_INS = 61, "Syncs completed", "Synchronization instructions completed";
    L1_DCH = 62, "L1D cache hits", "Level 1 data cache hits";
    L2_DCH = 63, "L2D cache hits", "Level 2 data cache hits";
    L1_DCA = 64, "L1D cache accesses", "Level 1 data cache accesses";
    L2_DCA = 65, "L2D cache accesses", "Level 2 data cache accesses";
    L3_DCA = 66, "L3D cache accesses", "Level 3 data cache accesses";
    L1_DCR = 67, "L1D cache reads", "Level 1 data cache reads";
    L2_DCR = 68, "L2D cache reads", "Level 2 data cache reads";
    L3_DCR = 69, "L3D cache reads", "Level 3 data cache reads";
    L1_DCW = 70, "L1D cache writes", "Level 1 data cache writes";
    L2_DCW = 71, "L2D cache writes", "Level 2 data cache writes";
    L3_DCW = 72, "L3D cache writes", "Level 3 data cache writes";
    L1_ICH = 73, "L1I cache hits", "Level 1 instruction cache hits";
    L2_ICH = 74, "L2I cache hits", "Level 2 instruction cache hits";
    L3_ICH = 75, "L3I cache hits", "Level 3 instruction cache hits";
    L1_ICA = 76, "L1I cache accesses", "Level 1 instruction cache accesses";
    L2_ICA = 77, "L2I cache accesses", "Level 2 instruction cache accesses";
    L3_ICA = 78, "L3I cache accesses", "Level 3 instruction cache accesses";
    L1_ICR = 79, "L1I cache reads", "Level 1 instruction cache reads";
    L2_ICR = 80, "L2I cache reads", "Level 2 instruction cache reads";
    L3_ICR = 81, "L3I cache reads", "Level 3 instruction cache reads";
    L1_ICW = 82, "L1I cache writes", "Level 1 instruction cache writes";
    L2_ICW = 83, "L2I cache writes", "Level 2 instruction cache writes";
    L3_ICW = 84, "L3I cache writes", "Level 3 instruction cache writes";
    L1_TCH = 85, "L1 cache hits", "Level 1 total cache hits";
    L2_TCH = 86, "L2 cache hits", "Level 2 total cache hits";
    L3_TCH = 87, "L3 cache hits", "Level 3 total cache hits";
    L1_TCA = 88, "L1 cache accesses", "Level 1 total cache accesses";
    L2_TCA = 89, "L2 cache accesses", "Level 2 total cache accesses";
    L3_TCA = 90, "L3 cache accesses", "Level 3 total cache accesses";
    L1_TCR = 91, "L1 cache reads", "Level 1 total cache reads";
    L2_TCR = 92, "L2 cache reads", "Level 2 total cache reads";
    L3_TCR = 93, "L3 cache reads", "Level 3 total cache reads";
    L1_TCW = 94, "L1 cache writes", "Level 1 total cache writes";
    L2_TCW = 95, "L2 cache writes", "Level 2 total cache writes";
    L3_TCW = 96, "L3 cache writes", "Level 3 total cache writes";
    FML_INS = 97, "FPU multiply", "Floating point multiply instructions";
    FAD_INS = 98, "FPU add", "Floating point add instructions";
    FDV_INS = 99, "FPU divide", "Floating point divide instructions";
    FSQ_INS = 100, "FPU square root", "Floating point square root instructions";
    FNV_INS = 101, "FPU inverse", "Floating point inverse instructions";
    FP_OPS = 102, "FP operations", "Floating point operations";
    SP_OPS = 103, "SP operations", "Floating point operations; optimized to count scaled single precision vector operations";
    DP_OPS = 104, "DP operations", "Floating point operations; optimized to count scaled double precision vector operations";
    VEC_SP = 105, "SP Vector/SIMD instr", "Single precision vector/SIMD instructions";
    VEC_DP = 106, "DP Vector/SIMD instr", "Double precision vector/SIMD instructions";
    REF_CYC = 107, "Reference cycles", "Reference clock cycles";
}

/// Number of standard presets.
pub fn num_presets() -> usize {
    PRESET_TABLE.len()
}

/// Index of the standard preset called `symbol`.
pub fn preset_index(symbol: &str) -> Option<usize> {
    PRESET_TABLE.iter().position(|(s, _, _)| *s == symbol)
}

/// Definitions shipped with the library.
pub static BUILTIN_DEFINITIONS: &str = include_str!("papi_events.csv");

/// One `PRESET` or `EVENT` line of a definition file.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDefinition {
    /// Symbol of the event, e.g. `PAPI_TOT_CYC`.
    pub symbol: String,
    /// How the natives combine.
    pub kind: DerivedKind,
    /// Formula for `DERIVED_POSTFIX` and `DERIVED_INFIX` events.
    pub formula: Option<Formula>,
    /// Native event names, in operand order.
    pub natives: Vec<String>,
    /// Sections (component names) the definition belongs to.
    pub sections: Vec<String>,
}

/// Parse a definition file.
///
/// Malformed lines are skipped with a warning; only an IO error fails the parse.
pub fn parse_definitions<R: std::io::Read>(input: R) -> Result<Vec<EventDefinition>> {
    let mut sections: Vec<String> = vec![];
    let mut last_was_cpu = false;
    let mut out = vec![];
    for (lineno, line) in BufReader::new(input).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        // Remove comments and empty lines
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        match fields[0] {
            "CPU" => {
                if !last_was_cpu {
                    sections.clear();
                }
                sections.extend(fields[1..].iter().filter(|f| !f.is_empty()).map(|f| f.to_string()));
                last_was_cpu = true;
            }
            "PRESET" | "EVENT" => {
                last_was_cpu = false;
                match _parse_definition(&fields[1..], &sections) {
                    Ok(def) => out.push(def),
                    Err(e) => warn!("Skipping event definition on line {}: {}", lineno + 1, e),
                }
            }
            other => {
                last_was_cpu = false;
                warn!("Unknown keyword {} on line {}", other, lineno + 1);
            }
        }
    }
    Ok(out)
}

fn _parse_definition(fields: &[&str], sections: &[String]) -> Result<EventDefinition> {
    if fields.len() < 3 {
        return Err(Error::Invalid);
    }
    let kind = DerivedKind::from_name(fields[1]).ok_or(Error::Invalid)?;
    let (formula, natives) = match kind {
        DerivedKind::Postfix => (Some(Formula::parse_postfix(fields[2])?), &fields[3..]),
        DerivedKind::Infix => (Some(Formula::parse_infix(fields[2])?), &fields[3..]),
        _ => (None, &fields[2..]),
    };
    let natives: Vec<String> = natives
        .iter()
        .filter(|n| !n.is_empty())
        .map(|n| n.to_string())
        .collect();
    if natives.is_empty() || natives.len() > crate::consts::EVENTS_IN_DERIVED_EVENT {
        return Err(Error::Count);
    }
    if let Some(ref f) = formula {
        if f.max_operand().map(|m| m >= natives.len()).unwrap_or(false) {
            return Err(Error::Invalid);
        }
    }
    Ok(EventDefinition {
        symbol: fields[0].into(),
        kind,
        formula,
        natives,
        sections: sections.to_vec(),
    })
}
