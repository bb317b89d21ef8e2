//! Hot-start files
//!
//! A hot-start file captures the dynamic state of a project at the end
//! of a run so a later run can pick up where it left off: subcatchment
//! ponded depths and infiltration state, node depths and lateral flows,
//! storage residence times, link flows and settings, and all pollutant
//! concentrations.
//!
//! Files written by this module carry the latest stamp; readers accept
//! versions 1 through 4 and upgrade older content in memory. Counts and
//! flow units must match the open project. A non-finite value anywhere
//! in the file aborts the read.

use crate::error::HotStartError;
use crate::infil::{Infiltration, INFIL_STATE_LEN};
use crate::model::StormwaterModel;
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Stamp written at the head of every file this module produces
const STAMP: &[u8] = b"SWMM5-HOTSTART4";

/// Stamp prefix shared by all accepted versions
const STAMP_PREFIX: &[u8] = b"SWMM5-HOTSTART";

/// Save the dynamic state of `model` to `path`
pub fn save<P: AsRef<Path>>(path: P, model: &StormwaterModel) -> Result<(), HotStartError> {
    let path = path.as_ref().to_path_buf();
    let file = File::create(&path).map_err(|e| HotStartError::Open(path.clone(), e))?;
    let mut f = BufWriter::new(file);
    let wr = |e| HotStartError::Write(path.clone(), e);

    f.write_all(STAMP).map_err(wr)?;

    let num_pollutants = model.pollutants.len();
    let num_land_uses = model.land_uses.len();
    f.write_i32::<NativeEndian>(model.subcatchments.len() as i32).map_err(wr)?;
    f.write_i32::<NativeEndian>(num_land_uses as i32).map_err(wr)?;
    f.write_i32::<NativeEndian>(model.network.node_count() as i32).map_err(wr)?;
    f.write_i32::<NativeEndian>(model.network.link_count() as i32).map_err(wr)?;
    f.write_i32::<NativeEndian>(num_pollutants as i32).map_err(wr)?;
    f.write_i32::<NativeEndian>(model.project.units.flow_unit().code()).map_err(wr)?;

    for sc in &model.subcatchments {
        for sub in &sc.subareas {
            f.write_f64::<NativeEndian>(sub.depth).map_err(wr)?;
        }
        f.write_f64::<NativeEndian>(sc.state.new_runoff).map_err(wr)?;
        for v in sc.infiltration.state() {
            f.write_f64::<NativeEndian>(v).map_err(wr)?;
        }
        for p in 0..num_pollutants {
            f.write_f64::<NativeEndian>(sc.state.runoff_quality[p]).map_err(wr)?;
            f.write_f64::<NativeEndian>(sc.state.ponded_quality[p]).map_err(wr)?;
        }
        for u in 0..num_land_uses {
            for p in 0..num_pollutants {
                f.write_f64::<NativeEndian>(sc.state.buildup[u][p]).map_err(wr)?;
            }
            f.write_f64::<NativeEndian>(sc.state.last_swept[u]).map_err(wr)?;
        }
    }

    for node in &model.network.nodes {
        f.write_f32::<NativeEndian>(node.state.new_depth as f32).map_err(wr)?;
        f.write_f32::<NativeEndian>(node.state.new_lat_flow as f32).map_err(wr)?;
        if node.is_storage() {
            f.write_f32::<NativeEndian>(node.state.hrt as f32).map_err(wr)?;
        }
        for p in 0..num_pollutants {
            f.write_f32::<NativeEndian>(node.state.quality[p] as f32).map_err(wr)?;
        }
    }

    for link in &model.network.links {
        f.write_f32::<NativeEndian>(link.state.new_flow as f32).map_err(wr)?;
        f.write_f32::<NativeEndian>(link.state.new_depth as f32).map_err(wr)?;
        f.write_f32::<NativeEndian>(link.state.setting as f32).map_err(wr)?;
        for p in 0..num_pollutants {
            f.write_f32::<NativeEndian>(link.state.quality[p] as f32).map_err(wr)?;
        }
    }

    f.flush().map_err(wr)?;
    info!("hot-start state saved to {}", path.display());
    Ok(())
}

/// Load dynamic state from `path` into `model`
pub fn load<P: AsRef<Path>>(path: P, model: &mut StormwaterModel) -> Result<(), HotStartError> {
    let path = path.as_ref().to_path_buf();
    let file = File::open(&path).map_err(|e| HotStartError::Open(path.clone(), e))?;
    let mut f = BufReader::new(file);

    let version = read_stamp(&mut f, &path)?;
    let mut r = SnapshotReader {
        f,
        path: path.clone(),
    };

    let num_subcatch = r.read_i32()? as usize;
    let num_land_uses = r.read_i32()? as usize;
    let num_nodes = r.read_i32()? as usize;
    let num_links = r.read_i32()? as usize;
    let num_pollutants = r.read_i32()? as usize;
    let flow_units = r.read_i32()?;

    check_count(&path, "subcatchments", num_subcatch, model.subcatchments.len())?;
    check_count(&path, "land uses", num_land_uses, model.land_uses.len())?;
    check_count(&path, "nodes", num_nodes, model.network.node_count())?;
    check_count(&path, "links", num_links, model.network.link_count())?;
    check_count(&path, "pollutants", num_pollutants, model.pollutants.len())?;
    if flow_units != model.project.units.flow_unit().code() {
        return Err(HotStartError::Incompatible(
            path,
            "flow units differ".to_string(),
        ));
    }

    // subcatchment state appears from version 3 on
    if version >= 3 {
        for sc in &mut model.subcatchments {
            for sub in &mut sc.subareas {
                sub.depth = r.read_f64()?;
            }
            sc.state.new_runoff = r.read_f64()?;
            let mut infil_state = [0.0; INFIL_STATE_LEN];
            for v in &mut infil_state {
                *v = r.read_f64()?;
            }
            sc.infiltration.set_state(infil_state);
            for p in 0..num_pollutants {
                sc.state.runoff_quality[p] = r.read_f64()?;
                sc.state.ponded_quality[p] = r.read_f64()?;
            }
            for u in 0..num_land_uses {
                for p in 0..num_pollutants {
                    sc.state.buildup[u][p] = r.read_f64()?;
                }
                sc.state.last_swept[u] = r.read_f64()?;
            }
        }
    }

    for node in &mut model.network.nodes {
        let depth = r.read_f32()?;
        let lat_flow = r.read_f32()?;
        node.state.new_depth = depth;
        node.state.old_depth = depth;
        node.state.new_lat_flow = lat_flow;
        node.state.old_lat_flow = lat_flow;
        node.state.new_volume = node.volume_of_depth(depth);
        node.state.old_volume = node.state.new_volume;
        // storage residence time appears from version 4 on
        if node.is_storage() && version >= 4 {
            node.state.hrt = r.read_f32()?;
        }
        for p in 0..num_pollutants {
            node.state.quality[p] = r.read_f32()?;
        }
    }

    for link in &mut model.network.links {
        let flow = r.read_f32()?;
        let depth = r.read_f32()?;
        let setting = r.read_f32()?;
        link.state.new_flow = flow;
        link.state.old_flow = flow;
        link.state.new_depth = depth;
        link.state.old_depth = depth;
        link.state.setting = setting.clamp(0.0, 1.0);
        link.state.target_setting = link.state.setting;
        if let Some(props) = link.conduit() {
            let a = props.xsect.area_of_depth(depth);
            let barrels = props.barrels.max(1) as f64;
            let length = props.length;
            link.state.a1 = a;
            link.state.a2 = a;
            link.state.q1 = flow / barrels;
            link.state.q2 = flow / barrels;
            link.state.new_volume = a * length * barrels;
            link.state.old_volume = link.state.new_volume;
        }
        for p in 0..num_pollutants {
            link.state.quality[p] = r.read_f32()?;
        }
    }

    info!(
        "hot-start state restored from {} (version {})",
        path.display(),
        version
    );
    Ok(())
}

/// Read and classify the stamp. Returns the file version.
fn read_stamp(f: &mut BufReader<File>, path: &Path) -> Result<u32, HotStartError> {
    let mut stamp = [0u8; 15];
    f.read_exact(&mut stamp)
        .map_err(|e| HotStartError::Read(path.to_path_buf(), e))?;
    if &stamp[..14] != STAMP_PREFIX {
        return Err(HotStartError::BadStamp(path.to_path_buf()));
    }
    match stamp[14] {
        b'1' => Ok(1),
        b'2' => Ok(2),
        b'3' => Ok(3),
        b'4' => Ok(4),
        _ => Err(HotStartError::BadStamp(path.to_path_buf())),
    }
}

fn check_count(
    path: &Path,
    what: &str,
    in_file: usize,
    in_model: usize,
) -> Result<(), HotStartError> {
    if in_file != in_model {
        return Err(HotStartError::Incompatible(
            path.to_path_buf(),
            format!("{what}: file has {in_file}, project has {in_model}"),
        ));
    }
    Ok(())
}

/// Reader wrapper that rejects non-finite values
struct SnapshotReader {
    f: BufReader<File>,
    path: PathBuf,
}

impl SnapshotReader {
    fn read_i32(&mut self) -> Result<i32, HotStartError> {
        self.f
            .read_i32::<NativeEndian>()
            .map_err(|e| HotStartError::Read(self.path.clone(), e))
    }

    fn read_f32(&mut self) -> Result<f64, HotStartError> {
        let v = self
            .f
            .read_f32::<NativeEndian>()
            .map_err(|e| HotStartError::Read(self.path.clone(), e))?;
        if !v.is_finite() {
            return Err(HotStartError::NotFinite(self.path.clone()));
        }
        Ok(v as f64)
    }

    fn read_f64(&mut self) -> Result<f64, HotStartError> {
        let v = self
            .f
            .read_f64::<NativeEndian>()
            .map_err(|e| HotStartError::Read(self.path.clone(), e))?;
        if !v.is_finite() {
            return Err(HotStartError::NotFinite(self.path.clone()));
        }
        Ok(v)
    }
}
