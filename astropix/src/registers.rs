/*!
ASIC register map.

The configuration shift register of the chip is described by four ordered
groups of named fields: digital config, bias config, per-channel DAC trims and
one receiver word per pixel column. Serialization order is the group order of
[`RegisterGroup::ALL`] followed by insertion order inside each group, so every
group is kept in an [`IndexMap`].

Receiver column word layout for a chip with `rows` rows (35 on AstroPix,
giving a 38 bit word):

| Bit(s)          | Meaning                                               |
|-----------------|-------------------------------------------------------|
| `rows + 2`      | analog output select (at most one column at a time)   |
| `rows + 1`      | column injection enable                               |
| `rows ..= 1`    | comparator mask, bit `row + 1`, 1 = pixel disabled    |
| `0`             | injection enable of the row numbered like this column |
*/

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bitfield;
use crate::error::{AsicError, Result};

/// Widest receiver mask that still fits a 64 bit column word
pub const MAX_ROWS: usize = bitfield::MAX_WIDTH - 3;

/// Bit width of the per-channel DAC trims
pub const DAC_WIDTH: usize = 6;

/// Register groups, in serialization order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterGroup {
    Digital,
    Bias,
    Dac,
    Receiver,
}

impl RegisterGroup {
    /// All groups in the order they are shifted into the chip
    pub const ALL: [RegisterGroup; 4] = [Self::Digital, Self::Bias, Self::Dac, Self::Receiver];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Digital => "digital",
            Self::Bias => "bias",
            Self::Dac => "dac",
            Self::Receiver => "receiver",
        }
    }
}

impl fmt::Display for RegisterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegisterGroup {
    type Err = AsicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "digital" | "digitalconfig" => Ok(Self::Digital),
            "bias" | "biasconfig" => Ok(Self::Bias),
            "dac" | "dacs" | "idacs" => Ok(Self::Dac),
            "receiver" | "recconfig" => Ok(Self::Receiver),
            _ => Err(AsicError::UnknownGroup(s.to_string())),
        }
    }
}

/// A single named field of the configuration shift register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEntry {
    name: String,
    width: usize,
    value: u64,
}

impl RegisterEntry {
    /// Create an entry, rejecting values that do not fit in `width`
    pub fn new(name: impl Into<String>, width: usize, value: u64) -> Result<Self> {
        bitfield::check_fits(value, width)?;
        Ok(Self {
            name: name.into(),
            width,
            value,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Overwrite the value, keeping the width
    pub fn set(&mut self, value: u64) -> Result<()> {
        bitfield::check_fits(value, self.width)?;
        self.value = value;
        Ok(())
    }

    fn set_bit(&mut self, bit: usize, on: bool) {
        debug_assert!(bit < self.width);
        if on {
            self.value |= 1 << bit;
        } else {
            self.value &= !(1 << bit);
        }
    }

    fn bit(&self, bit: usize) -> bool {
        (self.value >> bit) & 1 == 1
    }
}

/// Ordered name -> entry table for one register group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterBank {
    entries: IndexMap<String, RegisterEntry>,
}

impl RegisterBank {
    /// Create an empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; re-inserting a name keeps its original position
    pub fn push(&mut self, entry: RegisterEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Look up an entry by name
    pub fn get(&self, name: &str) -> Option<&RegisterEntry> {
        self.entries.get(name)
    }

    /// Look up an entry by position
    pub fn get_index(&self, index: usize) -> Option<&RegisterEntry> {
        self.entries.get_index(index).map(|(_, entry)| entry)
    }

    fn get_index_mut(&mut self, index: usize) -> Option<&mut RegisterEntry> {
        self.entries.get_index_mut(index).map(|(_, entry)| entry)
    }

    /// Entries in serialization order
    pub fn iter(&self) -> impl Iterator<Item = &RegisterEntry> {
        self.entries.values()
    }

    /// Entry names in serialization order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the declared widths of all entries
    pub fn total_bits(&self) -> usize {
        self.entries.values().map(|entry| entry.width).sum()
    }
}

/// Pixel matrix dimensions, validated on construction and deserialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GeometryFields")]
pub struct Geometry {
    rows: usize,
    cols: usize,
}

#[derive(Deserialize)]
struct GeometryFields {
    rows: usize,
    cols: usize,
}

impl TryFrom<GeometryFields> for Geometry {
    type Error = AsicError;

    fn try_from(fields: GeometryFields) -> Result<Self> {
        Geometry::new(fields.rows, fields.cols)
    }
}

impl Geometry {
    /// Validate the dimensions against the receiver word layout
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(AsicError::invalid_geometry(rows, cols, "matrix must not be empty"));
        }
        if rows > MAX_ROWS {
            return Err(AsicError::invalid_geometry(
                rows,
                cols,
                format!("at most {} rows fit in a column word", MAX_ROWS),
            ));
        }
        Ok(Self { rows, cols })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Width of one receiver column word
    pub fn column_word_width(&self) -> usize {
        self.rows + 3
    }

    /// Receiver word with every pixel masked and every switch off
    pub fn default_column_word(&self) -> u64 {
        bitfield::max_value(self.rows) << 1
    }

    fn analog_select_bit(&self) -> usize {
        self.rows + 2
    }

    fn column_injection_bit(&self) -> usize {
        self.rows + 1
    }

    fn mask_bit(row: usize) -> usize {
        row + 1
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            rows: crate::protocol::DEFAULT_ROWS,
            cols: crate::protocol::DEFAULT_COLS,
        }
    }
}

/// Default digital config: interrupt mode, injection enables, reset and spare bits
fn default_digital() -> RegisterBank {
    let mut bank = RegisterBank::new();
    let mut flag = |name: String, on: bool| bank.push(RegisterEntry { name, width: 1, value: on as u64 });

    flag("interrupt_pushpull".to_string(), true);
    for i in 1..19 {
        flag(format!("en_inj{}", i), false);
    }
    flag("reset_b".to_string(), false);
    for i in 0..15 {
        flag(format!("extrabit{}", i), i < 8);
    }
    bank
}

/// Default bias config switches
fn default_bias() -> RegisterBank {
    const BIAS: [(&str, u64); 6] = [
        ("dis_hidr", 0),
        ("q01", 0),
        ("qon0", 0),
        ("qon1", 1),
        ("qon2", 0),
        ("qon3", 1),
    ];

    let mut bank = RegisterBank::new();
    for (name, value) in BIAS {
        bank.push(RegisterEntry { name: name.to_string(), width: 1, value });
    }
    bank
}

/// Default per-channel DAC trims
fn default_dac() -> RegisterBank {
    const DACS: [(&str, u64); 19] = [
        ("blres", 0),
        ("nu1", 0),
        ("vn1", 20),
        ("vnfb", 1),
        ("vnfoll", 10),
        ("nu5", 0),
        ("nu6", 0),
        ("nu7", 0),
        ("nu8", 0),
        ("vn2", 0),
        ("vnfoll2", 1),
        ("vnbias", 0),
        ("vpload", 5),
        ("nu13", 0),
        ("vncomp", 2),
        ("vpfoll", 60),
        ("nu16", 0),
        ("vprec", 30),
        ("vnrec", 30),
    ];

    let mut bank = RegisterBank::new();
    for (name, value) in DACS {
        bank.push(RegisterEntry { name: name.to_string(), width: DAC_WIDTH, value });
    }
    bank
}

/// One disabled column word per physical column
fn default_receiver(geometry: &Geometry) -> RegisterBank {
    let mut bank = RegisterBank::new();
    for col in 0..geometry.cols() {
        bank.push(RegisterEntry {
            name: format!("col{}", col),
            width: geometry.column_word_width(),
            value: geometry.default_column_word(),
        });
    }
    bank
}

/// Complete configuration state of one chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    geometry: Geometry,
    digital: RegisterBank,
    bias: RegisterBank,
    dac: RegisterBank,
    receiver: RegisterBank,
}

impl RegisterMap {
    /// Create a map populated with the default configuration
    pub fn new(geometry: Geometry) -> Self {
        let mut map = Self {
            geometry,
            digital: RegisterBank::new(),
            bias: RegisterBank::new(),
            dac: RegisterBank::new(),
            receiver: RegisterBank::new(),
        };
        map.initialize_defaults();
        map
    }

    /// Replace every group with a fresh copy of its defaults
    pub fn initialize_defaults(&mut self) {
        self.digital = default_digital();
        self.bias = default_bias();
        self.dac = default_dac();
        self.receiver = default_receiver(&self.geometry);
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Borrow one group
    pub fn group(&self, group: RegisterGroup) -> &RegisterBank {
        match group {
            RegisterGroup::Digital => &self.digital,
            RegisterGroup::Bias => &self.bias,
            RegisterGroup::Dac => &self.dac,
            RegisterGroup::Receiver => &self.receiver,
        }
    }

    fn group_mut(&mut self, group: RegisterGroup) -> &mut RegisterBank {
        match group {
            RegisterGroup::Digital => &mut self.digital,
            RegisterGroup::Bias => &mut self.bias,
            RegisterGroup::Dac => &mut self.dac,
            RegisterGroup::Receiver => &mut self.receiver,
        }
    }

    /// All groups in serialization order
    pub fn groups(&self) -> impl Iterator<Item = (RegisterGroup, &RegisterBank)> {
        RegisterGroup::ALL.into_iter().map(move |group| (group, self.group(group)))
    }

    /// Look up a single entry
    pub fn get(&self, group: RegisterGroup, name: &str) -> Option<&RegisterEntry> {
        self.group(group).get(name)
    }

    /// Sum of all declared widths, i.e. the serialized bitstream length
    pub fn total_bits(&self) -> usize {
        self.groups().map(|(_, bank)| bank.total_bits()).sum()
    }

    /// Overwrite existing entries of `group` by name.
    ///
    /// Every override is checked before anything is written, so a bad name or
    /// value leaves the map untouched.
    pub fn apply_overrides<I, K>(&mut self, group: RegisterGroup, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: AsRef<str>,
    {
        let bank = self.group(group);
        let mut checked = Vec::new();
        for (name, value) in overrides {
            let name = name.as_ref();
            let entry = bank.get(name).ok_or_else(|| AsicError::UnknownRegister {
                group,
                name: name.to_string(),
            })?;
            let value = bitfield::check_value(value, entry.width)?;
            checked.push((name.to_string(), value));
        }

        let bank = self.group_mut(group);
        for (name, value) in checked {
            if let Some(entry) = bank.entries.get_mut(&name) {
                debug!("{}.{} = {}", group, name, value);
                entry.set(value)?;
            }
        }
        Ok(())
    }

    fn column_in_bounds(&self, col: usize) -> bool {
        if col < self.geometry.cols() {
            true
        } else {
            warn!("Column {} out of bounds (matrix has {} columns), ignoring", col, self.geometry.cols());
            false
        }
    }

    fn row_in_bounds(&self, row: usize) -> bool {
        if row < self.geometry.rows() {
            true
        } else {
            warn!("Row {} out of bounds (matrix has {} rows), ignoring", row, self.geometry.rows());
            false
        }
    }

    /// Receiver slot carrying the injection switch of `row`.
    ///
    /// Row injection switches sit in bit 0 of the column words, addressed by
    /// row number. Rows without a matching column word have no switch.
    fn row_injection_slot(&self, row: usize) -> Option<usize> {
        if !self.row_in_bounds(row) {
            return None;
        }
        if row >= self.geometry.cols() {
            warn!(
                "Row {} has no injection switch ({} column words), ignoring",
                row, self.geometry.cols()
            );
            return None;
        }
        Some(row)
    }

    fn column_word_mut(&mut self, col: usize) -> Option<&mut RegisterEntry> {
        self.receiver.get_index_mut(col)
    }

    fn set_column_bit(&mut self, col: usize, bit: usize, on: bool) {
        if let Some(word) = self.column_word_mut(col) {
            word.set_bit(bit, on);
        }
    }

    /// Enable the comparator of one pixel. Returns false if out of bounds.
    pub fn enable_pixel(&mut self, col: usize, row: usize) -> bool {
        self.set_pixel_masked(col, row, false)
    }

    /// Disable the comparator of one pixel. Returns false if out of bounds.
    pub fn disable_pixel(&mut self, col: usize, row: usize) -> bool {
        self.set_pixel_masked(col, row, true)
    }

    fn set_pixel_masked(&mut self, col: usize, row: usize, masked: bool) -> bool {
        if !(self.column_in_bounds(col) && self.row_in_bounds(row)) {
            return false;
        }
        self.set_column_bit(col, Geometry::mask_bit(row), masked);
        true
    }

    /// Whether the comparator of a pixel is enabled, `None` if out of bounds
    pub fn is_pixel_enabled(&self, col: usize, row: usize) -> Option<bool> {
        if !(self.column_in_bounds(col) && self.row_in_bounds(row)) {
            return None;
        }
        self.receiver
            .get_index(col)
            .map(|word| !word.bit(Geometry::mask_bit(row)))
    }

    /// Turn on the injection switch of a column
    pub fn enable_injection_column(&mut self, col: usize) -> bool {
        self.set_column_injection(col, true)
    }

    /// Turn off the injection switch of a column
    pub fn disable_injection_column(&mut self, col: usize) -> bool {
        self.set_column_injection(col, false)
    }

    fn set_column_injection(&mut self, col: usize, on: bool) -> bool {
        if !self.column_in_bounds(col) {
            return false;
        }
        let bit = self.geometry.column_injection_bit();
        self.set_column_bit(col, bit, on);
        true
    }

    /// Turn on the injection switch of a row
    pub fn enable_injection_row(&mut self, row: usize) -> bool {
        self.set_row_injection(row, true)
    }

    /// Turn off the injection switch of a row
    pub fn disable_injection_row(&mut self, row: usize) -> bool {
        self.set_row_injection(row, false)
    }

    fn set_row_injection(&mut self, row: usize, on: bool) -> bool {
        match self.row_injection_slot(row) {
            Some(slot) => {
                self.set_column_bit(slot, 0, on);
                true
            }
            None => false,
        }
    }

    /// Route `col` to the analog output mux, deselecting every other column
    pub fn select_analog_output_column(&mut self, col: usize) -> bool {
        if !self.column_in_bounds(col) {
            return false;
        }
        let bit = self.geometry.analog_select_bit();
        for index in 0..self.receiver.len() {
            self.set_column_bit(index, bit, index == col);
        }
        true
    }

    /// Column currently routed to the analog output, if any
    pub fn analog_output_column(&self) -> Option<usize> {
        let bit = self.geometry.analog_select_bit();
        self.receiver.iter().position(|word| word.bit(bit))
    }

    /// Prepare one pixel for analog readout: select its column for the analog
    /// mux, enable column injection and the comparator, and the row injection
    /// switch when `inject` is set.
    pub fn configure_analog_pixel(&mut self, col: usize, row: usize, inject: bool) -> bool {
        if !(self.column_in_bounds(col) && self.row_in_bounds(row)) {
            return false;
        }
        self.select_analog_output_column(col);
        self.enable_injection_column(col);
        self.enable_pixel(col, row);
        if inject {
            self.enable_injection_row(row);
        }
        true
    }

    /// Restore every receiver word to its disabled default
    pub fn reset_all(&mut self) {
        self.receiver = default_receiver(&self.geometry);
    }

    /// Load a digital pixel mask.
    ///
    /// One line per column, holding that column's comparator mask bits with the
    /// highest row first. Characters other than `0`/`1` are dropped and lines
    /// beyond the column count are ignored. Each listed column word becomes
    /// `(mask << 1) | inject` with analog select and column injection off.
    pub fn apply_digital_mask(&mut self, mask: &str, inject: bool) -> Result<usize> {
        let rows = self.geometry.rows();
        let mut words = Vec::new();

        let lines = mask
            .lines()
            .map(|line| line.chars().filter(|c| matches!(c, '0' | '1')).collect::<String>())
            .filter(|bits| !bits.is_empty());

        for (col, bits) in lines.enumerate() {
            if col >= self.geometry.cols() {
                warn!("Mask has more lines than the {} matrix columns, ignoring the rest", self.geometry.cols());
                break;
            }
            if bits.len() > rows {
                return Err(AsicError::invalid_mask(format!(
                    "line {} has {} bits, matrix has {} rows",
                    col,
                    bits.len(),
                    rows
                )));
            }
            let row_mask = u64::from_str_radix(&bits, 2)
                .map_err(|e| AsicError::invalid_mask(format!("line {}: {}", col, e)))?;
            words.push((row_mask << 1) | inject as u64);
        }

        let applied = words.len();
        for (col, value) in words.into_iter().enumerate() {
            if let Some(word) = self.column_word_mut(col) {
                word.set(value)?;
            }
        }
        debug!("Applied digital mask to {} columns", applied);
        Ok(applied)
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::new(Geometry::default())
    }
}

impl fmt::Display for RegisterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Geometry: {} rows x {} cols", self.geometry.rows(), self.geometry.cols())?;
        for (group, bank) in self.groups() {
            writeln!(f, "[{}]", group)?;
            for entry in bank.iter() {
                if group == RegisterGroup::Receiver {
                    writeln!(
                        f,
                        "{} = {:#0w$b} ({})",
                        entry.name,
                        entry.value,
                        entry.width,
                        w = entry.width + 2
                    )?;
                } else {
                    writeln!(f, "{} = {} ({})", entry.name, entry.value, entry.width)?;
                }
            }
        }
        Ok(())
    }
}
