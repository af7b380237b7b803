//! Resolves relocations into absolute offsets within the single image.

use indexmap::IndexMap;

use crate::emitter::{ConstPool, EmitUnit};
use crate::error::CoreError;
use crate::opcode::write_u32le;

#[derive(Debug)]
pub struct LinkedImage {
    pub text: Vec<u8>,
    pub pool: ConstPool,
    /// Function symbols in declaration order, by unsigilled name.
    pub functions: IndexMap<String, u32>,
}

pub fn link(unit: EmitUnit) -> Result<LinkedImage, CoreError> {
    let EmitUnit {
        mut text,
        pool,
        mut labels,
        functions,
        relocs,
    } = unit;

    let mut table: IndexMap<String, u32> = IndexMap::new();
    for (name, offset) in functions {
        if table.insert(name.clone(), offset).is_some() {
            return Err(CoreError::DuplicateFunction { name });
        }
    }
    // Functions become addressable entry points alongside `:` labels.
    for (name, offset) in &table {
        labels.insert(name.clone(), *offset);
    }

    for reloc in &relocs {
        let Some(&target) = labels.get(&reloc.sym) else {
            return Err(CoreError::UnresolvedSymbol {
                symbol: reloc.sym.clone(),
                offset: reloc.pos,
            });
        };
        write_u32le(&mut text, reloc.pos as usize, target);
    }

    Ok(LinkedImage {
        text,
        pool,
        functions: table,
    })
}
