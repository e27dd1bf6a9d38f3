use std::fmt;

use core_sim::{cache::CacheDump, reference::Reference};

/// The minimum number of bits per group in a prettified binary string.
const MIN_BITS_PER_GROUP: usize = 3;
/// Column names of the reference table.
const REF_COL_NAMES: [&str; 6] = ["WordAddr", "BinAddr", "Tag", "Index", "Offset", "Hit/Miss"];

#[derive(Clone, Copy)]
pub enum Alignment {
    Right,
    Center,
}

/// A fixed-width text table. The width is split evenly between the columns
/// of each row; cells wider than their column simply overflow it.
pub struct Table {
    pub title: Option<String>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    width: usize,
    alignment: Alignment,
}

impl Table {
    pub fn new(width: usize, alignment: Alignment) -> Self {
        Self {
            title: None,
            header: Vec::new(),
            rows: Vec::new(),
            width,
            alignment,
        }
    }

    fn write_row(&self, f: &mut fmt::Formatter<'_>, cells: &[String]) -> fmt::Result {
        let cell_width = self.width / cells.len().max(1);
        for cell in cells {
            match self.alignment {
                Alignment::Right => write!(f, "{cell:>cell_width$}")?,
                Alignment::Center => write!(f, "{cell:^cell_width$}")?,
            }
        }
        writeln!(f)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(title) = &self.title {
            writeln!(f, "{title:^width$}", width = self.width)?;
            writeln!(f, "{:-<width$}", "", width = self.width)?;
        }
        if !self.header.is_empty() {
            self.write_row(f, &self.header)?;
            writeln!(f, "{:-<width$}", "", width = self.width)?;
        }
        for row in &self.rows {
            self.write_row(f, row)?;
        }
        Ok(())
    }
}

/// Splits a binary string into readable halves until a half would drop
/// below the minimum group size.
pub fn prettify_bin(bin: &str) -> String {
    let mid = bin.len() / 2;
    if mid < MIN_BITS_PER_GROUP {
        bin.to_string()
    } else {
        let (left, right) = bin.split_at(mid);
        format!("{} {}", prettify_bin(left), prettify_bin(right))
    }
}

fn bin_or_na(bin: Option<String>) -> String {
    match bin {
        Some(b) => prettify_bin(&b),
        None => "n/a".to_string(),
    }
}

/// One row per reference: address, its decomposition, and its status.
pub fn addr_ref_table(refs: &[Reference], width: usize) -> Table {
    let mut table = Table::new(width, Alignment::Right);
    table.header = REF_COL_NAMES.iter().map(|s| s.to_string()).collect();
    for r in refs {
        let status = r
            .cache_status
            .map(|s| s.to_string())
            .unwrap_or_default();
        table.rows.push(vec![
            r.addr.word_addr.to_string(),
            prettify_bin(&r.addr.bin_addr()),
            bin_or_na(r.addr.bin_tag()),
            bin_or_na(r.addr.bin_index()),
            bin_or_na(r.addr.bin_offset()),
            status,
        ]);
    }
    table
}

/// One column per set, one row per block position, data words comma-joined.
pub fn cache_table(dump: &CacheDump, width: usize) -> Table {
    let mut table = Table::new(width, Alignment::Center);
    table.title = Some(if dump.is_l2 { "L2 Cache" } else { "L1 Cache" }.to_string());
    if dump.sets.len() > 1 {
        table.header = dump.sets.keys().cloned().collect();
    } else {
        table.header = vec!["Set".to_string()];
    }
    let max_blocks = dump.sets.values().map(|blocks| blocks.len()).max().unwrap_or(0);
    for i in 0..max_blocks {
        let row = dump
            .sets
            .values()
            .map(|blocks| match blocks.get(i) {
                Some(data) => data
                    .iter()
                    .map(|w| w.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                None => String::new(),
            })
            .collect();
        table.rows.push(row);
    }
    table
}
