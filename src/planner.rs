//! Turns a script into the instruction list that actually runs.
//!
//! A query whose exact `(schemas, types)` target was not indexed by an earlier
//! instruction gets an implicit index instruction right in front of it.

use tracing::debug;

use crate::error::{ArcScriptError, Result};
use crate::script::{IndexInstruction, Instruction};
use crate::storage::IndexingStrategy;

/// A finalized, immutable instruction list.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    instructions: Vec<Instruction>,
}

impl Plan {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
    pub fn len(&self) -> usize {
        self.instructions.len()
    }
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
    pub fn implicit_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|i| matches!(i, Instruction::Index(index) if index.implicit))
            .count()
    }
}

impl IntoIterator for Plan {
    type Item = Instruction;
    type IntoIter = std::vec::IntoIter<Instruction>;
    fn into_iter(self) -> Self::IntoIter {
        self.instructions.into_iter()
    }
}

pub fn plan(mut instructions: Vec<Instruction>, strategy: IndexingStrategy) -> Result<Plan> {
    if let Some(offending) = instructions
        .iter()
        .find(|i| matches!(i, Instruction::Index(_) | Instruction::Query(_)) && i.schemas().is_empty())
    {
        return Err(ArcScriptError::Impermissible {
            message: "instruction must name at least one schema".into(),
            instruction: offending.to_string(),
        });
    }

    // only instructions of the list as given count as preceding
    let mut insertions = Vec::new();
    for (position, instruction) in instructions.iter().enumerate() {
        let Instruction::Query(query) = instruction else {
            continue;
        };
        let indexed = instructions[..position]
            .iter()
            .any(|earlier| matches!(earlier, Instruction::Index(index) if index.covers(query)));
        if !indexed {
            insertions.push((position, IndexInstruction::implicit_for(query, strategy)));
        }
    }
    for (position, index) in insertions.into_iter().rev() {
        debug!(position, instruction = %index, "inserting implicit index");
        instructions.insert(position, Instruction::Index(index));
    }
    Ok(Plan { instructions })
}
