//! Binary results stream
//!
//! A seek-indexed binary file holding one fixed-layout record per
//! reporting period. The header is written at open, records are appended
//! at each reporting tick, and a closing index record at the end of the
//! file lets a reader locate everything without scanning.
//!
//! Record layout per period:
//!
//! | Offset | Content |
//! |---|---|
//! | 0 | 8-byte IEEE-754 date/time (days since the simulation epoch) |
//! | 8 | subcatchment count × `n_subcatch_results` × 4-byte float |
//! | … | node count × `n_node_results` × 4-byte float |
//! | … | link count × `n_link_results` × 4-byte float |
//! | … | `MAX_SYS_RESULTS` × 4-byte float |
//!
//! Values are host-native byte order; the format is intentionally not
//! portable across endianness.

use crate::error::OutputError;
use crate::model::StormwaterModel;
use crate::subcatch::ACRE;
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

/// Magic number stamped in the header and the closing index record
pub const STREAM_MAGIC: i32 = 0x53_46_4C_57;

/// Stream format version
pub const STREAM_VERSION: i32 = 1;

/// Number of system-wide values per period
pub const MAX_SYS_RESULTS: usize = 15;

/// Per-subcatchment values before the per-pollutant block
pub const N_SUBCATCH_BASE: usize = 8;

/// Per-node values before the per-pollutant block
pub const N_NODE_BASE: usize = 6;

/// Per-link values before the per-pollutant block
pub const N_LINK_BASE: usize = 5;

/// Largest file size the closing index can address
const MAX_FILE_SIZE: u64 = i32::MAX as u64;

/// Object counts fixing the record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayout {
    pub num_subcatch: usize,
    pub num_nodes: usize,
    pub num_links: usize,
    pub num_pollutants: usize,
}

impl StreamLayout {
    /// Layout matching a model
    pub fn of_model(model: &StormwaterModel) -> Self {
        Self {
            num_subcatch: model.subcatchments.len(),
            num_nodes: model.network.node_count(),
            num_links: model.network.link_count(),
            num_pollutants: model.pollutants.len(),
        }
    }

    /// Values per subcatchment per period
    pub fn n_subcatch_results(&self) -> usize {
        N_SUBCATCH_BASE + self.num_pollutants
    }

    /// Values per node per period
    pub fn n_node_results(&self) -> usize {
        N_NODE_BASE + self.num_pollutants
    }

    /// Values per link per period
    pub fn n_link_results(&self) -> usize {
        N_LINK_BASE + self.num_pollutants
    }

    /// Bytes occupied by one reporting period
    pub fn bytes_per_period(&self) -> u64 {
        8 + 4 * (self.num_subcatch * self.n_subcatch_results()
            + self.num_nodes * self.n_node_results()
            + self.num_links * self.n_link_results()
            + MAX_SYS_RESULTS) as u64
    }
}

/// Writer for the binary results stream
pub struct OutputWriter {
    file: BufWriter<File>,
    layout: StreamLayout,
    /// Byte position where period records begin
    start_pos: u64,
    /// Periods written so far
    num_periods: usize,
}

impl OutputWriter {
    /// Create the stream and write its header
    pub fn open<P: AsRef<Path>>(path: P, model: &StormwaterModel) -> Result<Self, OutputError> {
        let file = File::create(path.as_ref())
            .map_err(|e| OutputError::Open(path.as_ref().to_path_buf(), e))?;
        let mut file = BufWriter::new(file);
        let layout = StreamLayout::of_model(model);

        file.write_i32::<NativeEndian>(STREAM_MAGIC)
            .map_err(OutputError::Write)?;
        file.write_i32::<NativeEndian>(STREAM_VERSION)
            .map_err(OutputError::Write)?;
        file.write_i32::<NativeEndian>(model.project.units.flow_unit().code())
            .map_err(OutputError::Write)?;
        file.write_i32::<NativeEndian>(layout.num_subcatch as i32)
            .map_err(OutputError::Write)?;
        file.write_i32::<NativeEndian>(layout.num_nodes as i32)
            .map_err(OutputError::Write)?;
        file.write_i32::<NativeEndian>(layout.num_links as i32)
            .map_err(OutputError::Write)?;
        file.write_i32::<NativeEndian>(layout.num_pollutants as i32)
            .map_err(OutputError::Write)?;
        file.write_i32::<NativeEndian>(model.project.options.report_step as i32)
            .map_err(OutputError::Write)?;

        let start_pos = file.stream_position().map_err(OutputError::Write)?;
        Ok(Self {
            file,
            layout,
            start_pos,
            num_periods: 0,
        })
    }

    /// Number of periods written so far
    pub fn num_periods(&self) -> usize {
        self.num_periods
    }

    /// Append one reporting-period record.
    ///
    /// `report_time_days` is the report date as days since the
    /// simulation epoch.
    pub fn save_results(
        &mut self,
        model: &StormwaterModel,
        report_time_days: f64,
    ) -> Result<(), OutputError> {
        let next_size =
            self.start_pos + (self.num_periods as u64 + 1) * self.layout.bytes_per_period();
        if next_size > MAX_FILE_SIZE {
            return Err(OutputError::SizeOverflow);
        }

        let f = &mut self.file;
        f.write_f64::<NativeEndian>(report_time_days)
            .map_err(OutputError::Write)?;

        for sc in &model.subcatchments {
            let area = sc.area_ft2().max(1.0);
            // rates are reported in customary units: in/hr and in/day
            write_f32(f, sc.state.rainfall * 12.0 * 3600.0)?;
            write_f32(f, sc.state.new_snow_depth * 12.0)?;
            write_f32(f, sc.state.evap_rate / area * 12.0 * 86400.0)?;
            write_f32(f, sc.state.infil_rate / area * 12.0 * 3600.0)?;
            write_f32(f, sc.state.new_runoff)?;
            write_f32(f, 0.0)?; // groundwater flow
            write_f32(f, 0.0)?; // groundwater elevation
            write_f32(f, 0.0)?; // soil moisture
            for p in 0..self.layout.num_pollutants {
                write_f32(f, sc.state.washoff[p])?;
            }
        }

        for node in &model.network.nodes {
            let state = &node.state;
            write_f32(f, state.new_depth)?;
            write_f32(f, node.invert_elevation + state.new_depth)?;
            write_f32(f, state.new_volume)?;
            write_f32(f, state.new_lat_flow)?;
            write_f32(f, state.inflow)?;
            write_f32(f, state.overflow)?;
            for p in 0..self.layout.num_pollutants {
                write_f32(f, state.quality[p])?;
            }
        }

        for link in &model.network.links {
            let state = &link.state;
            write_f32(f, state.new_flow)?;
            write_f32(f, state.new_depth)?;
            let (velocity, capacity) = match link.conduit() {
                Some(props) => {
                    let a = 0.5 * (state.a1 + state.a2);
                    let v = if a > 0.0 {
                        state.new_flow / props.barrels.max(1) as f64 / a
                    } else {
                        0.0
                    };
                    let a_full = props.xsect.a_full();
                    let c = if a_full > 0.0 { a / a_full } else { 0.0 };
                    (v, c)
                }
                None => (0.0, state.setting),
            };
            write_f32(f, velocity)?;
            write_f32(f, state.new_volume)?;
            write_f32(f, capacity)?;
            for p in 0..self.layout.num_pollutants {
                write_f32(f, state.quality[p])?;
            }
        }

        for value in system_results(model) {
            write_f32(f, value)?;
        }

        self.num_periods += 1;
        Ok(())
    }

    /// Write the closing index record and flush the stream.
    /// Returns the number of periods written.
    pub fn close(mut self, error_code: i32) -> Result<usize, OutputError> {
        self.file
            .write_i32::<NativeEndian>(self.start_pos as i32)
            .map_err(OutputError::Write)?;
        self.file
            .write_i32::<NativeEndian>(self.num_periods as i32)
            .map_err(OutputError::Write)?;
        self.file
            .write_i32::<NativeEndian>(error_code)
            .map_err(OutputError::Write)?;
        self.file
            .write_i32::<NativeEndian>(STREAM_MAGIC)
            .map_err(OutputError::Write)?;
        self.file.flush().map_err(OutputError::Write)?;
        Ok(self.num_periods)
    }
}

fn write_f32(f: &mut BufWriter<File>, value: f64) -> Result<(), OutputError> {
    f.write_f32::<NativeEndian>(value as f32)
        .map_err(OutputError::Write)
}

/// System-wide values for one reporting period
fn system_results(model: &StormwaterModel) -> [f64; MAX_SYS_RESULTS] {
    let mut total_area = 0.0;
    let mut rainfall = 0.0;
    let mut snow = 0.0;
    let mut infil = 0.0;
    let mut runoff = 0.0;
    let mut evap = 0.0;
    for sc in &model.subcatchments {
        let area = sc.area_ft2();
        total_area += area;
        rainfall += sc.state.rainfall * area;
        snow += sc.state.new_snow_depth * area;
        infil += sc.state.infil_rate;
        runoff += sc.state.new_runoff;
        evap += sc.state.evap_rate;
    }
    if total_area > 0.0 {
        rainfall = rainfall / total_area * 12.0 * 3600.0;
        snow = snow / total_area * 12.0;
    }

    let mut lateral = 0.0;
    let mut flooding = 0.0;
    let mut outfall_flow = 0.0;
    let mut stored = 0.0;
    for node in &model.network.nodes {
        lateral += node.state.new_lat_flow;
        flooding += node.state.overflow;
        stored += node.state.new_volume;
        if node.is_outfall() {
            outfall_flow += node.state.inflow;
        }
    }
    for link in &model.network.links {
        stored += link.state.new_volume;
    }

    [
        0.0, // air temperature (no climate module attached)
        rainfall,
        snow,
        infil,
        runoff,
        0.0, // dry-weather inflow
        0.0, // groundwater inflow
        0.0, // rainfall-derived infiltration/inflow
        0.0, // direct external inflow
        lateral,
        flooding,
        outfall_flow,
        stored,
        evap,
        evap / total_area.max(ACRE) * 12.0 * 86400.0, // potential ET, in/day
    ]
}

/// Reader for the binary results stream
pub struct OutputReader {
    file: BufReader<File>,
    layout: StreamLayout,
    start_pos: u64,
    num_periods: usize,
    /// Error code recorded by the writer at close
    pub error_code: i32,
}

impl OutputReader {
    /// Open a stream, verify both magic stamps, and read the index
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OutputError> {
        let file = File::open(path.as_ref())
            .map_err(|e| OutputError::Open(path.as_ref().to_path_buf(), e))?;
        let mut file = BufReader::new(file);

        let magic = file.read_i32::<NativeEndian>().map_err(OutputError::Read)?;
        if magic != STREAM_MAGIC {
            return Err(OutputError::Corrupt("bad header magic".to_string()));
        }
        let _version = file.read_i32::<NativeEndian>().map_err(OutputError::Read)?;
        let _flow_units = file.read_i32::<NativeEndian>().map_err(OutputError::Read)?;
        let num_subcatch = file.read_i32::<NativeEndian>().map_err(OutputError::Read)? as usize;
        let num_nodes = file.read_i32::<NativeEndian>().map_err(OutputError::Read)? as usize;
        let num_links = file.read_i32::<NativeEndian>().map_err(OutputError::Read)? as usize;
        let num_pollutants = file.read_i32::<NativeEndian>().map_err(OutputError::Read)? as usize;
        let _report_step = file.read_i32::<NativeEndian>().map_err(OutputError::Read)?;

        // the closing index sits in the last 16 bytes
        file.seek(SeekFrom::End(-16)).map_err(OutputError::Read)?;
        let start_pos = file.read_i32::<NativeEndian>().map_err(OutputError::Read)? as u64;
        let num_periods = file.read_i32::<NativeEndian>().map_err(OutputError::Read)? as usize;
        let error_code = file.read_i32::<NativeEndian>().map_err(OutputError::Read)?;
        let end_magic = file.read_i32::<NativeEndian>().map_err(OutputError::Read)?;
        if end_magic != STREAM_MAGIC {
            return Err(OutputError::Corrupt("bad closing magic".to_string()));
        }

        Ok(Self {
            file,
            layout: StreamLayout {
                num_subcatch,
                num_nodes,
                num_links,
                num_pollutants,
            },
            start_pos,
            num_periods,
            error_code,
        })
    }

    /// Number of reporting periods in the stream
    pub fn num_periods(&self) -> usize {
        self.num_periods
    }

    /// Record layout read from the header
    pub fn layout(&self) -> StreamLayout {
        self.layout
    }

    fn period_pos(&self, period: usize) -> Result<u64, OutputError> {
        if period == 0 || period > self.num_periods {
            return Err(OutputError::PeriodOutOfRange(period, self.num_periods));
        }
        Ok(self.start_pos + (period as u64 - 1) * self.layout.bytes_per_period())
    }

    /// Date/time of a 1-based reporting period (days since epoch)
    pub fn read_date(&mut self, period: usize) -> Result<f64, OutputError> {
        let pos = self.period_pos(period)?;
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(OutputError::Read)?;
        self.file.read_f64::<NativeEndian>().map_err(OutputError::Read)
    }

    /// Results for subcatchment `k` in a 1-based period
    pub fn read_subcatch_results(
        &mut self,
        period: usize,
        k: usize,
    ) -> Result<Vec<f32>, OutputError> {
        let n = self.layout.n_subcatch_results();
        let offset = 8 + (k * n * 4) as u64;
        self.read_floats_at(period, offset, n)
    }

    /// Results for node `k` in a 1-based period
    pub fn read_node_results(&mut self, period: usize, k: usize) -> Result<Vec<f32>, OutputError> {
        let n = self.layout.n_node_results();
        let offset = 8
            + 4 * (self.layout.num_subcatch * self.layout.n_subcatch_results()) as u64
            + (k * n * 4) as u64;
        self.read_floats_at(period, offset, n)
    }

    /// Results for link `k` in a 1-based period
    pub fn read_link_results(&mut self, period: usize, k: usize) -> Result<Vec<f32>, OutputError> {
        let n = self.layout.n_link_results();
        let offset = 8
            + 4 * (self.layout.num_subcatch * self.layout.n_subcatch_results()
                + self.layout.num_nodes * self.layout.n_node_results()) as u64
            + (k * n * 4) as u64;
        self.read_floats_at(period, offset, n)
    }

    /// System-wide results for a 1-based period
    pub fn read_sys_results(&mut self, period: usize) -> Result<Vec<f32>, OutputError> {
        let offset = 8
            + 4 * (self.layout.num_subcatch * self.layout.n_subcatch_results()
                + self.layout.num_nodes * self.layout.n_node_results()
                + self.layout.num_links * self.layout.n_link_results()) as u64;
        self.read_floats_at(period, offset, MAX_SYS_RESULTS)
    }

    fn read_floats_at(
        &mut self,
        period: usize,
        offset: u64,
        count: usize,
    ) -> Result<Vec<f32>, OutputError> {
        let pos = self.period_pos(period)? + offset;
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(OutputError::Read)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.file.read_f32::<NativeEndian>().map_err(OutputError::Read)?);
        }
        Ok(values)
    }
}
