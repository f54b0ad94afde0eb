//! Grid Model: the 2-D step × column arrangement, per-cell overrides, and
//! section/region metadata (spec.md §3, §4.5).

use dm_core::{DmError, DmResult, MAX_COLUMNS, MAX_STEPS};

/// One `(step, column)` entry (spec.md §3 Grid Cell).
#[derive(Debug, Clone, Copy, Default)]
pub struct Cell {
    pub sample_slot: Option<usize>,
    pub volume_override: Option<f32>,
    pub pitch_override: Option<f32>,
}

/// An ordered, consecutive run of steps (spec.md §3 Section).
#[derive(Debug, Clone, Copy)]
pub struct Section {
    pub start_step: usize,
    pub step_count: usize,
}

pub struct Grid {
    cells: Vec<Cell>,
    columns: usize,
    sections: Vec<Section>,
}

impl Grid {
    pub fn new() -> Self {
        let sections = vec![Section { start_step: 0, step_count: MAX_STEPS }];
        Self {
            cells: vec![Cell::default(); MAX_STEPS * MAX_COLUMNS],
            columns: MAX_COLUMNS,
            sections,
        }
    }

    fn index(&self, step: usize, column: usize) -> usize {
        step * MAX_COLUMNS + column
    }

    fn check_coords(&self, step: usize, column: usize) -> DmResult<()> {
        if step >= MAX_STEPS {
            return Err(DmError::BadArgument(format!("step {step} out of range")));
        }
        if column >= self.columns {
            return Err(DmError::BadArgument(format!("column {column} >= current columns {}", self.columns)));
        }
        Ok(())
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn set_columns(&mut self, n: usize) -> DmResult<()> {
        if n == 0 || n > MAX_COLUMNS {
            return Err(DmError::BadArgument(format!("columns {n} out of range")));
        }
        self.columns = n;
        Ok(())
    }

    pub fn cell(&self, step: usize, column: usize) -> DmResult<Cell> {
        self.check_coords(step, column)?;
        Ok(self.cells[self.index(step, column)])
    }

    /// Sets a cell's slot reference, clearing any overrides (spec.md §3:
    /// "overrides...cleared whenever the slot reference changes").
    pub fn set_cell(&mut self, step: usize, column: usize, slot: Option<usize>) -> DmResult<()> {
        self.check_coords(step, column)?;
        let idx = self.index(step, column);
        self.cells[idx] = Cell { sample_slot: slot, volume_override: None, pitch_override: None };
        Ok(())
    }

    pub fn clear_cell(&mut self, step: usize, column: usize) -> DmResult<()> {
        self.set_cell(step, column, None)
    }

    pub fn clear_all(&mut self) {
        for cell in &mut self.cells {
            *cell = Cell::default();
        }
    }

    pub fn set_cell_volume(&mut self, step: usize, column: usize, v: f32) -> DmResult<()> {
        self.check_coords(step, column)?;
        if !(0.0..=1.0).contains(&v) {
            return Err(DmError::BadArgument(format!("volume {v} out of [0,1]")));
        }
        let idx = self.index(step, column);
        self.cells[idx].volume_override = Some(v);
        Ok(())
    }

    pub fn reset_cell_volume(&mut self, step: usize, column: usize) -> DmResult<()> {
        self.check_coords(step, column)?;
        let idx = self.index(step, column);
        self.cells[idx].volume_override = None;
        Ok(())
    }

    pub fn get_cell_volume(&self, step: usize, column: usize) -> DmResult<Option<f32>> {
        self.check_coords(step, column)?;
        Ok(self.cells[self.index(step, column)].volume_override)
    }

    pub fn set_cell_pitch(&mut self, step: usize, column: usize, p: f32) -> DmResult<()> {
        self.check_coords(step, column)?;
        if !(dm_core::MIN_PITCH_RATIO..=dm_core::MAX_PITCH_RATIO).contains(&p) {
            return Err(DmError::BadArgument(format!("pitch {p} out of range")));
        }
        let idx = self.index(step, column);
        self.cells[idx].pitch_override = Some(p);
        Ok(())
    }

    pub fn reset_cell_pitch(&mut self, step: usize, column: usize) -> DmResult<()> {
        self.check_coords(step, column)?;
        let idx = self.index(step, column);
        self.cells[idx].pitch_override = None;
        Ok(())
    }

    pub fn get_cell_pitch(&self, step: usize, column: usize) -> DmResult<Option<f32>> {
        self.check_coords(step, column)?;
        Ok(self.cells[self.index(step, column)].pitch_override)
    }

    /// `resolve_volume(step, column, slot) = cell.volume_override ??
    /// slot.default_volume` (spec.md §4.5).
    pub fn resolve_volume(&self, step: usize, column: usize, slot_default: f32) -> f32 {
        self.cell(step, column)
            .ok()
            .and_then(|c| c.volume_override)
            .unwrap_or(slot_default)
    }

    pub fn resolve_pitch(&self, step: usize, column: usize, slot_default: f32) -> f32 {
        self.cell(step, column)
            .ok()
            .and_then(|c| c.pitch_override)
            .unwrap_or(slot_default)
    }

    // -- Sections --

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn section_start(&self, i: usize) -> DmResult<usize> {
        self.sections.get(i).map(|s| s.start_step).ok_or_else(|| {
            DmError::BadArgument(format!("section {i} out of range"))
        })
    }

    pub fn section_steps(&self, i: usize) -> DmResult<usize> {
        self.sections.get(i).map(|s| s.step_count).ok_or_else(|| {
            DmError::BadArgument(format!("section {i} out of range"))
        })
    }

    pub fn section_at_step(&self, step: usize) -> Option<usize> {
        self.sections.iter().position(|s| step >= s.start_step && step < s.start_step + s.step_count)
    }

    pub fn set_section_steps(&mut self, i: usize, n: usize) -> DmResult<()> {
        if i >= self.sections.len() {
            return Err(DmError::BadArgument(format!("section {i} out of range")));
        }
        self.sections[i].step_count = n;
        self.renumber_sections();
        Ok(())
    }

    fn renumber_sections(&mut self) {
        let mut cursor = 0usize;
        for section in &mut self.sections {
            section.start_step = cursor;
            cursor += section.step_count;
        }
    }

    /// Inserts a step inside `section`, shifting later sections' starts
    /// (spec.md §4.5). Voices for cells at/after the inserted point must
    /// be rebuilt by the caller (voice pool, not this module).
    pub fn insert_step(&mut self, section: usize, at_step: usize) -> DmResult<()> {
        if section >= self.sections.len() {
            return Err(DmError::BadArgument(format!("section {section} out of range")));
        }
        self.sections[section].step_count += 1;
        self.renumber_sections();
        let _ = at_step;
        Ok(())
    }

    pub fn delete_step(&mut self, section: usize, at_step: usize) -> DmResult<()> {
        if section >= self.sections.len() {
            return Err(DmError::BadArgument(format!("section {section} out of range")));
        }
        if self.sections[section].step_count == 0 {
            return Err(DmError::BadState("section has no steps to delete".into()));
        }
        self.sections[section].step_count -= 1;
        self.renumber_sections();
        let _ = at_step;
        Ok(())
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_cell_clears_overrides() {
        let mut g = Grid::new();
        g.set_cell(0, 0, Some(3)).unwrap();
        g.set_cell_volume(0, 0, 0.25).unwrap();
        g.set_cell(0, 0, Some(5)).unwrap();
        assert_eq!(g.get_cell_volume(0, 0).unwrap(), None);
    }

    #[test]
    fn resolve_volume_prefers_override_then_default() {
        let mut g = Grid::new();
        g.set_cell(0, 0, Some(0)).unwrap();
        assert_eq!(g.resolve_volume(0, 0, 0.8), 0.8);
        g.set_cell_volume(0, 0, 0.25).unwrap();
        assert_eq!(g.resolve_volume(0, 0, 0.5), 0.25);
        g.reset_cell_volume(0, 0).unwrap();
        assert_eq!(g.resolve_volume(0, 0, 0.5), 0.5);
    }

    #[test]
    fn set_cell_rejects_column_beyond_current_columns() {
        let mut g = Grid::new();
        g.set_columns(4).unwrap();
        assert!(matches!(g.set_cell(0, 4, Some(0)), Err(DmError::BadArgument(_))));
        assert!(g.set_cell(0, 3, Some(0)).is_ok());
    }

    #[test]
    fn insert_step_shifts_later_sections() {
        let mut g = Grid::new();
        g.set_section_steps(0, 8).unwrap();
        g.sections.push(Section { start_step: 8, step_count: 8 });
        g.insert_step(0, 4).unwrap();
        assert_eq!(g.section_start(1).unwrap(), 9);
    }

    #[test]
    fn bad_coords_rejected() {
        let g = Grid::new();
        assert!(matches!(g.cell(MAX_STEPS, 0), Err(DmError::BadArgument(_))));
    }
}
