/*!
# Hit Decoder - AstroPix readouts for Python

Python extension exposing the AstroPix core to analysis scripts: raw readout
buffers go in, columns of hit fields come out as numpy arrays.

## Usage

```python
import hit_decoder

decoder = hit_decoder.Decoder(sample_clock_period_ns=5.0)
hits = decoder.decode(readout_bytes, readout_index=12)
print(hits["tot_us"].mean())

# Configuration vector with pixel (0, 0) enabled and injected
bits = hit_decoder.bitstream(pixels=[(0, 0)], inject=True)
```
*/

use astropix::{serialize, BitOrder, DecodedHit, ExtractOptions, Geometry, HitDecoder, RegisterMap};
use numpy::ToPyArray;
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict, PyModule};
use pyo3::Bound;

fn value_error(context: &str, e: astropix::AsicError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}: {}", context, e))
}

/// Python wrapper for the Rust readout decoder
#[pyclass(name = "Decoder")]
pub struct PyDecoder {
    inner: HitDecoder,
}

#[pymethods]
impl PyDecoder {
    #[new]
    #[pyo3(signature = (sample_clock_period_ns=5.0, reverse_bitorder=true, log_hits=false))]
    fn new(sample_clock_period_ns: f64, reverse_bitorder: bool, log_hits: bool) -> Self {
        let extract = ExtractOptions::new(BitOrder::from_reversed(reverse_bitorder));
        PyDecoder {
            inner: HitDecoder::new(sample_clock_period_ns)
                .with_extract_options(extract)
                .with_hit_logging(log_hits),
        }
    }

    #[getter]
    fn sample_clock_period_ns(&self) -> f64 {
        self.inner.sample_clock_period_ns
    }

    /// Decode every hit frame of one raw readout
    ///
    /// Args:
    ///     readout: raw bytes as returned by the FPGA
    ///     readout_index: index stored with every hit (default: 0)
    ///
    /// Returns:
    ///     dict of numpy arrays, one entry per hit field. `hittime` is the
    ///     capture time as Unix seconds.
    ///
    /// Raises:
    ///     ValueError: the readout ends inside a hit frame
    #[pyo3(signature = (readout, readout_index=0))]
    fn decode<'py>(&self, py: Python<'py>, readout: &[u8], readout_index: u64) -> PyResult<Bound<'py, PyDict>> {
        let hits = self
            .inner
            .decode_readout(readout, readout_index)
            .map_err(|e| value_error("Failed to decode readout", e))?;
        hits_to_columns(py, &hits)
    }
}

/// Hit fields as a dict of equally long numpy arrays
fn hits_to_columns<'py>(py: Python<'py>, hits: &[DecodedHit]) -> PyResult<Bound<'py, PyDict>> {
    fn column<T: Copy>(hits: &[DecodedHit], field: impl Fn(&DecodedHit) -> T) -> Vec<T> {
        hits.iter().map(field).collect()
    }

    let columns = PyDict::new_bound(py);
    columns.set_item("readout", column(hits, |h| h.readout_index).to_pyarray_bound(py))?;
    columns.set_item("chip_id", column(hits, |h| h.chip_id).to_pyarray_bound(py))?;
    columns.set_item("payload", column(hits, |h| h.payload).to_pyarray_bound(py))?;
    columns.set_item("location", column(hits, |h| h.location).to_pyarray_bound(py))?;
    columns.set_item("is_col", column(hits, |h| h.is_column).to_pyarray_bound(py))?;
    columns.set_item("timestamp", column(hits, |h| h.timestamp).to_pyarray_bound(py))?;
    columns.set_item("tot_msb", column(hits, |h| h.tot_msb).to_pyarray_bound(py))?;
    columns.set_item("tot_lsb", column(hits, |h| h.tot_lsb).to_pyarray_bound(py))?;
    columns.set_item("tot_total", column(hits, |h| h.tot_total).to_pyarray_bound(py))?;
    columns.set_item("tot_us", column(hits, |h| h.tot_time_us).to_pyarray_bound(py))?;
    columns.set_item(
        "hittime",
        column(hits, |h| h.capture_time.timestamp_micros() as f64 / 1e6).to_pyarray_bound(py),
    )?;
    Ok(columns)
}

/// Build the transmitted configuration vector of a default register map
///
/// Args:
///     rows, cols: pixel matrix geometry (default: 35 x 35)
///     pixels: (col, row) pairs whose comparator is enabled
///     inject: also enable column and row injection for those pixels
///
/// Returns:
///     the bitstream packed MSB first, last byte zero padded
#[pyfunction]
#[pyo3(signature = (rows=35, cols=35, pixels=Vec::new(), inject=false))]
fn bitstream<'py>(
    py: Python<'py>,
    rows: usize,
    cols: usize,
    pixels: Vec<(usize, usize)>,
    inject: bool,
) -> PyResult<Bound<'py, PyBytes>> {
    let geometry = Geometry::new(rows, cols).map_err(|e| value_error("Invalid geometry", e))?;
    let mut map = RegisterMap::new(geometry);
    for (col, row) in pixels {
        map.enable_pixel(col, row);
        if inject {
            map.enable_injection_column(col);
            map.enable_injection_row(row);
        }
    }

    let bits = serialize(&map, true).map_err(|e| value_error("Failed to serialize configuration", e))?;
    Ok(PyBytes::new_bound(py, &bits.to_bytes()))
}

/// Python module definition
#[pymodule]
fn hit_decoder(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyDecoder>()?;
    m.add_function(wrap_pyfunction!(bitstream, m)?)?;
    m.add("__version__", astropix::VERSION)?;

    m.add("IDLE_BYTE", astropix::protocol::IDLE_BYTE)?;
    m.add("BYTES_PER_HIT", astropix::protocol::BYTES_PER_HIT)?;

    Ok(())
}
