// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Simulate visibilities of point sources and image them.

#[cfg(test)]
mod tests;

use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use console::style;
use hifitime::Epoch;
use log::{debug, info, trace};
use marlu::RADec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

use super::common::{
    display_warnings, parse_array_position, InfoPrinter, Warn, ARG_FILE_HELP, ARRAY_POSITION_HELP,
};
use crate::{
    gridding::DataColumn,
    image::{parse_stokes, ImageError, ImageGeometry, SpectralAxis},
    imager::{CycleOrder, ImagerError, ImagingOptions},
    params::ImageParams,
    vis::{
        simulate::{spiral_layout, PointSource, SimulationParams},
        Correlation,
    },
    HyperimageError,
};

const DEFAULT_OUTPUT_PREFIX: &str = "hyp";
const DEFAULT_IMAGE_SIZE: usize = 256;
const DEFAULT_CELL_ARCSEC: f64 = 60.0;
const DEFAULT_NUM_ANTENNAS: usize = 32;
const DEFAULT_ARRAY_RADIUS_M: f64 = 500.0;
const DEFAULT_NUM_CHANNELS: usize = 1;
const DEFAULT_FREQ_RES_KHZ: f64 = 40.0;
const DEFAULT_MIDDLE_FREQ_MHZ: f64 = 150.0;
const DEFAULT_NUM_TIMESTEPS: usize = 4;
const DEFAULT_TIME_RES_SECONDS: f64 = 8.0;
const DEFAULT_START_GPS: f64 = 1090008640.0;
const DEFAULT_TIMESTEPS_PER_BUFFER: usize = 2;

lazy_static::lazy_static! {
    static ref SIZE_HELP: String =
        format!("The number of pixels on each side of the image. Must be even. Default: {DEFAULT_IMAGE_SIZE}");

    static ref CELL_HELP: String =
        format!("The size of each pixel [arcseconds]. Default: {DEFAULT_CELL_ARCSEC}");

    static ref OUTPUT_PREFIX_HELP: String =
        format!("The prefix of output FITS files, e.g. <PREFIX>_image.fits. Default: {DEFAULT_OUTPUT_PREFIX}");

    static ref NUM_ANTENNAS_HELP: String =
        format!("The number of simulated antennas. Default: {DEFAULT_NUM_ANTENNAS}");

    static ref ARRAY_RADIUS_HELP: String =
        format!("The radius of the simulated spiral array [metres]. Default: {DEFAULT_ARRAY_RADIUS_M}");

    static ref NUM_CHANNELS_HELP: String =
        format!("The number of simulated channels. Default: {DEFAULT_NUM_CHANNELS}");

    static ref FREQ_RES_HELP: String =
        format!("The channel resolution [kHz]. Default: {DEFAULT_FREQ_RES_KHZ}");

    static ref MIDDLE_FREQ_HELP: String =
        format!("The centroid frequency of the simulation [MHz]. Default: {DEFAULT_MIDDLE_FREQ_MHZ}");

    static ref NUM_TIMESTEPS_HELP: String =
        format!("The number of simulated timesteps. Default: {DEFAULT_NUM_TIMESTEPS}");

    static ref TIME_RES_HELP: String =
        format!("The time resolution [seconds]. Default: {DEFAULT_TIME_RES_SECONDS}");

    static ref START_HELP: String =
        format!("The GPS time of the first timestep [seconds]. Default: {DEFAULT_START_GPS}");
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct ImagingCliArgs {
    /// The phase centre right ascension [degrees]. Default: 0
    #[clap(short, long, help_heading = "IMAGE")]
    pub(super) ra: Option<f64>,

    /// The phase centre declination [degrees]. Default: -27
    #[clap(short, long, allow_hyphen_values = true, help_heading = "IMAGE")]
    pub(super) dec: Option<f64>,

    #[clap(short, long, help = SIZE_HELP.as_str(), help_heading = "IMAGE")]
    pub(super) size: Option<usize>,

    #[clap(long, help = CELL_HELP.as_str(), help_heading = "IMAGE")]
    pub(super) cell: Option<f64>,

    /// The Stokes planes to make, in IQUV order, e.g. "IV". Default: I
    #[clap(long, help_heading = "IMAGE")]
    pub(super) stokes: Option<String>,

    /// Make one image per channel, rather than a single multi-frequency
    /// synthesis image.
    #[clap(long, help_heading = "IMAGE")]
    #[serde(default)]
    pub(super) cube: bool,

    /// Split the image into this many facets on each side. Default: 1
    #[clap(long, help_heading = "IMAGE")]
    pub(super) facets: Option<usize>,

    /// Split the channels of a cube into this many chunks, each imaged by
    /// its own pass over the data. Default: 1
    #[clap(long, help_heading = "IMAGE")]
    pub(super) chanchunks: Option<usize>,

    /// The FT machine: gridft, wprojectft, mosaicft or awprojectft. Default:
    /// gridft
    #[clap(long, help_heading = "GRIDDING")]
    pub(super) ftmachine: Option<String>,

    /// The number of w-projection planes. Default: 1
    #[clap(long, help_heading = "GRIDDING")]
    pub(super) wprojplanes: Option<usize>,

    /// The factor by which grids are larger than images. Default: 1.2
    #[clap(long, help_heading = "GRIDDING")]
    pub(super) padding: Option<f64>,

    /// Grid in double precision.
    #[clap(long, help_heading = "GRIDDING")]
    #[serde(default)]
    pub(super) double_precision: bool,

    /// Grids with more complex elements than this are kept in tiles on disk.
    #[clap(long, help_heading = "GRIDDING")]
    pub(super) cache_size: Option<usize>,

    /// The side length of disk tiles [pixels]. Default: 64
    #[clap(long, help_heading = "GRIDDING")]
    pub(super) tile_size: Option<usize>,

    /// Grid auto-correlations too.
    #[clap(long, help_heading = "GRIDDING")]
    #[serde(default)]
    pub(super) use_zero: bool,

    /// Fail rather than truncate kernels that don't fit in the grid.
    #[clap(long, help_heading = "GRIDDING")]
    #[serde(default)]
    pub(super) strict_support: bool,

    /// The dish diameter used by primary-beam kernels [metres]. Default: 12
    #[clap(long, help_heading = "GRIDDING")]
    pub(super) dish_diameter: Option<f64>,

    /// How major cycles are ordered: by-buffer or by-mapper. Default:
    /// by-buffer
    #[clap(long, help_heading = "GRIDDING")]
    pub(super) cycle_order: Option<String>,

    #[clap(short = 'o', long, help = OUTPUT_PREFIX_HELP.as_str(), help_heading = "OUTPUT FILES")]
    pub(super) output_prefix: Option<PathBuf>,

    /// Don't write the PSF.
    #[clap(long, help_heading = "OUTPUT FILES")]
    #[serde(default)]
    pub(super) no_psf: bool,
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct SimulationCliArgs {
    /// Point sources to simulate, each as "RA,DEC,FLUX" [degrees, degrees,
    /// Jy]. Default: a 1 Jy source at the phase centre.
    #[clap(long, multiple_values(true), allow_hyphen_values = true, help_heading = "SIMULATION")]
    pub(super) point: Option<Vec<String>>,

    #[clap(long, help = NUM_ANTENNAS_HELP.as_str(), help_heading = "SIMULATION")]
    pub(super) num_antennas: Option<usize>,

    #[clap(long, help = ARRAY_RADIUS_HELP.as_str(), help_heading = "SIMULATION")]
    pub(super) array_radius: Option<f64>,

    #[clap(
        long, help = ARRAY_POSITION_HELP.as_str(), help_heading = "SIMULATION",
        number_of_values = 3,
        allow_hyphen_values = true,
        value_names = &["LONG_DEG", "LAT_DEG", "HEIGHT_M"]
    )]
    pub(super) array_position: Option<Vec<f64>>,

    #[clap(short = 'c', long, help = NUM_CHANNELS_HELP.as_str(), help_heading = "SIMULATION")]
    pub(super) num_channels: Option<usize>,

    #[clap(short, long, help = FREQ_RES_HELP.as_str(), help_heading = "SIMULATION")]
    pub(super) freq_res: Option<f64>,

    #[clap(long, help = MIDDLE_FREQ_HELP.as_str(), help_heading = "SIMULATION")]
    pub(super) middle_freq: Option<f64>,

    #[clap(short = 't', long, help = NUM_TIMESTEPS_HELP.as_str(), help_heading = "SIMULATION")]
    pub(super) num_timesteps: Option<usize>,

    #[clap(long, help = TIME_RES_HELP.as_str(), help_heading = "SIMULATION")]
    pub(super) time_res: Option<f64>,

    #[clap(long, help = START_HELP.as_str(), help_heading = "SIMULATION")]
    pub(super) start: Option<f64>,

    /// Simulate all four instrumental correlations, rather than only XX and
    /// YY.
    #[clap(long, help_heading = "SIMULATION")]
    #[serde(default)]
    pub(super) full_pol: bool,
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct ImageArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(rename = "image")]
    #[serde(default)]
    pub(super) imaging_args: ImagingCliArgs,

    #[clap(flatten)]
    #[serde(rename = "simulation")]
    #[serde(default)]
    pub(super) simulation_args: SimulationCliArgs,
}

impl ImageArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<ImageArgs, HyperimageError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let ImageArgs {
                args_file: _,
                imaging_args,
                simulation_args,
            } = unpack_arg_file!(arg_file);

            Ok(ImageArgs {
                args_file: None,
                imaging_args: cli_args.imaging_args.merge(imaging_args),
                simulation_args: cli_args.simulation_args.merge(simulation_args),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn parse(self) -> Result<ImageParams, ImageArgsError> {
        debug!("{:#?}", self);

        // Expose all the struct fields to ensure they're all used.
        let ImageArgs {
            args_file: _,
            imaging_args:
                ImagingCliArgs {
                    ra,
                    dec,
                    size,
                    cell,
                    stokes,
                    cube,
                    facets,
                    chanchunks,
                    ftmachine,
                    wprojplanes,
                    padding,
                    double_precision,
                    cache_size,
                    tile_size,
                    use_zero,
                    strict_support,
                    dish_diameter,
                    cycle_order,
                    output_prefix,
                    no_psf,
                },
            simulation_args:
                SimulationCliArgs {
                    point,
                    num_antennas,
                    array_radius,
                    array_position,
                    num_channels,
                    freq_res,
                    middle_freq,
                    num_timesteps,
                    time_res,
                    start,
                    full_pol,
                },
        } = self;

        let phase_centre = {
            let ra = ra.unwrap_or(0.0);
            let dec = dec.unwrap_or(-27.0);
            if !(0.0..=360.0).contains(&ra) {
                return Err(ImageArgsError::RaInvalid);
            }
            if !(-90.0..=90.0).contains(&dec) {
                return Err(ImageArgsError::DecInvalid);
            }
            RADec::from_degrees(ra, dec)
        };
        let array_position = parse_array_position(array_position)
            .map_err(|pos| ImageArgsError::BadArrayPosition { pos })?;

        let mut coord_printer = InfoPrinter::new("Coordinates".into());
        coord_printer.push_block(vec![
            style("                   RA        Dec")
                .bold()
                .to_string()
                .into(),
            format!(
                "Phase centre:      {:>8.4}° {:>8.4}° (J2000)",
                phase_centre.ra.to_degrees(),
                phase_centre.dec.to_degrees()
            )
            .into(),
        ]);
        coord_printer.push_line(
            format!(
                "Array position:    {:>8.4}° {:>8.4}° {:.4}m",
                array_position.longitude_rad.to_degrees(),
                array_position.latitude_rad.to_degrees(),
                array_position.height_metres
            )
            .into(),
        );
        coord_printer.display();

        // Channel frequencies.
        let num_channels = num_channels.unwrap_or(DEFAULT_NUM_CHANNELS);
        let freq_res = freq_res.unwrap_or(DEFAULT_FREQ_RES_KHZ) * 1e3; // kHz -> Hz
        if freq_res < f64::EPSILON {
            return Err(ImageArgsError::FreqResTooSmall);
        }
        let middle_freq = middle_freq.unwrap_or(DEFAULT_MIDDLE_FREQ_MHZ) * 1e6; // MHz -> Hz
        let freqs_hz = {
            let half = num_channels as f64 / 2.0;
            let freqs = (0..num_channels)
                .map(|i| middle_freq + (i as f64 - half + 0.5) * freq_res)
                .collect();
            Vec1::try_from_vec(freqs).map_err(|_| ImageArgsError::ZeroChannels)?
        };

        let num_timesteps = num_timesteps.unwrap_or(DEFAULT_NUM_TIMESTEPS);
        if num_timesteps == 0 {
            return Err(ImageArgsError::ZeroTimesteps);
        }
        let num_antennas = num_antennas.unwrap_or(DEFAULT_NUM_ANTENNAS);
        if num_antennas < 2 {
            return Err(ImageArgsError::TooFewAntennas(num_antennas));
        }

        let sources = match point {
            Some(points) => points
                .iter()
                .map(|s| parse_point_source(s))
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![PointSource::unpolarised(phase_centre, 1.0)],
        };

        let time_res = time_res.unwrap_or(DEFAULT_TIME_RES_SECONDS);
        let simulation = SimulationParams {
            phase_centre,
            array_position,
            antennas: spiral_layout(
                num_antennas,
                array_radius.unwrap_or(DEFAULT_ARRAY_RADIUS_M),
                array_position.latitude_rad,
            ),
            start: Epoch::from_gpst_seconds(start.unwrap_or(DEFAULT_START_GPS)),
            num_timesteps,
            time_res_s: time_res,
            freqs_hz: freqs_hz.to_vec(),
            correlations: if full_pol {
                vec![
                    Correlation::XX,
                    Correlation::XY,
                    Correlation::YX,
                    Correlation::YY,
                ]
            } else {
                vec![Correlation::XX, Correlation::YY]
            },
            sources,
            timesteps_per_buffer: DEFAULT_TIMESTEPS_PER_BUFFER,
            include_autos: use_zero,
        };

        let mut sim_printer = InfoPrinter::new("Simulation".into());
        sim_printer.push_block(vec![
            format!(
                "{num_antennas} antennas, {} baselines",
                num_antennas * (num_antennas - 1) / 2
            )
            .into(),
            format!("{num_timesteps} timesteps at {time_res} s").into(),
            format!(
                "{num_channels} channels from {:.3} to {:.3} MHz",
                *freqs_hz.first() / 1e6,
                *freqs_hz.last() / 1e6
            )
            .into(),
        ]);
        sim_printer.push_line(format!("{} point source(s)", simulation.sources.len()).into());
        sim_printer.display();

        // Imaging options.
        let defaults = ImagingOptions::default();
        let cycle_order = match cycle_order {
            Some(s) => CycleOrder::from_str(&s).map_err(|_| ImageArgsError::BadCycleOrder(s))?,
            None => defaults.cycle_order,
        };
        let options = ImagingOptions {
            ftmachine: ftmachine.unwrap_or(defaults.ftmachine),
            wprojplanes: wprojplanes.unwrap_or(defaults.wprojplanes),
            padding: padding.unwrap_or(defaults.padding),
            use_double_precision: double_precision,
            facets: facets.unwrap_or(defaults.facets),
            chanchunks: chanchunks.unwrap_or(defaults.chanchunks),
            stokes: stokes.unwrap_or(defaults.stokes),
            cache_size: cache_size.unwrap_or(defaults.cache_size),
            tile_size: tile_size.unwrap_or(defaults.tile_size),
            use_zero,
            strict_support,
            dish_diameter_m: dish_diameter.unwrap_or(defaults.dish_diameter_m),
            cycle_order,
            // Simulated sources only have observed visibilities.
            datacolumn: DataColumn::Observed,
            ..defaults
        };
        let kind = options.validate()?;
        if options.chanchunks > 1 && !cube {
            "Channel chunks are only used with cubes; ignoring --chanchunks".warn();
        }
        let options = ImagingOptions {
            chanchunks: if cube { options.chanchunks } else { 1 },
            ..options
        };

        let size = size.unwrap_or(DEFAULT_IMAGE_SIZE);
        let cell_arcsec = cell.unwrap_or(DEFAULT_CELL_ARCSEC);
        let spectral = if cube {
            SpectralAxis::Cube {
                freqs_hz: freqs_hz.to_vec(),
                width_hz: freq_res,
            }
        } else {
            SpectralAxis::Mfs {
                ref_freq_hz: middle_freq,
            }
        };
        let geometry = ImageGeometry::new(
            phase_centre,
            size,
            size,
            (cell_arcsec / 3600.0).to_radians(),
            spectral,
            parse_stokes(&options.stokes)?,
        )?;
        let field_of_view = (size as f64 * cell_arcsec / 3600.0).min(180.0);
        if field_of_view > 30.0 {
            format!("The image is {field_of_view:.1}° across; expect SIN-projection distortion far from the centre").warn();
        }

        let mut image_printer = InfoPrinter::new("Imaging".into());
        image_printer.push_block(vec![
            format!("{size}x{size} pixels of {cell_arcsec}\"").into(),
            format!("Stokes {}", geometry.stokes_string()).into(),
            format!(
                "{} channel(s){}",
                geometry.num_chans(),
                if cube { "" } else { " (MFS)" }
            )
            .into(),
        ]);
        image_printer.push_block(vec![
            format!(
                "{} with {} w-plane(s)",
                kind.name(),
                if kind.uses_w_planes() {
                    options.wprojplanes
                } else {
                    1
                }
            )
            .into(),
            format!("Padding {}", options.padding).into(),
            format!("Major cycles ordered {}", options.cycle_order).into(),
        ]);
        if options.facets > 1 {
            image_printer.push_line(format!("{0}x{0} facets", options.facets).into());
        }
        if options.chanchunks > 1 {
            image_printer.push_line(format!("{} channel chunks", options.chanchunks).into());
        }
        image_printer.display();

        let output_prefix = output_prefix.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PREFIX));
        if let Some(parent) = output_prefix.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ImageArgsError::OutputDirDoesntExist(parent.to_path_buf()));
            }
        }

        display_warnings();

        Ok(ImageParams {
            simulation,
            geometry,
            options,
            output_prefix,
            write_psf: !no_psf,
        })
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), HyperimageError> {
        debug!("Converting arguments into parameters");
        trace!("{:#?}", self);
        let params = self.parse()?;

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        params.run()?;
        Ok(())
    }
}

/// Parse "RA,DEC,FLUX" into an unpolarised point source.
fn parse_point_source(s: &str) -> Result<PointSource, ImageArgsError> {
    let err = || ImageArgsError::BadPointSource(s.to_string());
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| err())?;
    match values.as_slice() {
        [ra, dec, flux] if (-90.0..=90.0).contains(dec) => Ok(PointSource::unpolarised(
            RADec::from_degrees(ra.rem_euclid(360.0), *dec),
            *flux,
        )),
        _ => Err(err()),
    }
}

#[derive(Error, Debug)]
pub(super) enum ImageArgsError {
    #[error("Right Ascension was not within 0 to 360!")]
    RaInvalid,

    #[error("Declination was not within -90 to 90!")]
    DecInvalid,

    #[error("Array position specified as {pos:?}, not [<Longitude>, <Latitude>, <Height>]")]
    BadArrayPosition { pos: Vec<f64> },

    #[error("Number of channels cannot be 0!")]
    ZeroChannels,

    #[error("The channel resolution cannot be 0 or negative!")]
    FreqResTooSmall,

    #[error("Number of timesteps cannot be 0!")]
    ZeroTimesteps,

    #[error("At least 2 antennas are needed to make baselines, but {0} were asked for")]
    TooFewAntennas(usize),

    #[error("Couldn't parse point source '{0}'; expected RA,DEC,FLUX in degrees and Jy")]
    BadPointSource(String),

    #[error("Unknown cycle order '{0}'; use by-buffer or by-mapper")]
    BadCycleOrder(String),

    #[error("The directory of the output prefix '{}' doesn't exist", .0.display())]
    OutputDirDoesntExist(PathBuf),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Imager(#[from] ImagerError),
}

impl ImagingCliArgs {
    fn merge(self, other: Self) -> Self {
        Self {
            ra: self.ra.or(other.ra),
            dec: self.dec.or(other.dec),
            size: self.size.or(other.size),
            cell: self.cell.or(other.cell),
            stokes: self.stokes.or(other.stokes),
            cube: self.cube || other.cube,
            facets: self.facets.or(other.facets),
            chanchunks: self.chanchunks.or(other.chanchunks),
            ftmachine: self.ftmachine.or(other.ftmachine),
            wprojplanes: self.wprojplanes.or(other.wprojplanes),
            padding: self.padding.or(other.padding),
            double_precision: self.double_precision || other.double_precision,
            cache_size: self.cache_size.or(other.cache_size),
            tile_size: self.tile_size.or(other.tile_size),
            use_zero: self.use_zero || other.use_zero,
            strict_support: self.strict_support || other.strict_support,
            dish_diameter: self.dish_diameter.or(other.dish_diameter),
            cycle_order: self.cycle_order.or(other.cycle_order),
            output_prefix: self.output_prefix.or(other.output_prefix),
            no_psf: self.no_psf || other.no_psf,
        }
    }
}

impl SimulationCliArgs {
    fn merge(self, other: Self) -> Self {
        Self {
            point: self.point.or(other.point),
            num_antennas: self.num_antennas.or(other.num_antennas),
            array_radius: self.array_radius.or(other.array_radius),
            array_position: self.array_position.or(other.array_position),
            num_channels: self.num_channels.or(other.num_channels),
            freq_res: self.freq_res.or(other.freq_res),
            middle_freq: self.middle_freq.or(other.middle_freq),
            num_timesteps: self.num_timesteps.or(other.num_timesteps),
            time_res: self.time_res.or(other.time_res),
            start: self.start.or(other.start),
            full_pol: self.full_pol || other.full_pol,
        }
    }
}
