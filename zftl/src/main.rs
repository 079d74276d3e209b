// vim: tw=80
use std::path::PathBuf;

use clap::{crate_version, Args, Parser};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use serde_derive::Deserialize;
use tracing_subscriber::EnvFilter;
use zftl_core::{
    Addr,
    Error,
    Result,
    band::{Band, BandState},
    base_dev::{Geometry, SimDev},
    conf::Conf,
    device::Dev,
    mngt::{run_shutdown, run_startup},
    nv_cache::MemMdRegion,
    types::BandT,
};

fn default_cache_blocks() -> u64 {
    1024
}

fn default_per_poll() -> u64 {
    256
}

/// Synthetic write workload
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Workload {
    /// Total number of blocks to write
    writes: u64,
    /// Seed for the random LBA generator
    #[serde(default)]
    seed: u64,
    /// Blocks written between core poller iterations
    #[serde(default = "default_per_poll")]
    per_poll: u64,
}

/// Contents of the file given to `zftl run`
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunConfig {
    device: Conf,
    geometry: Geometry,
    /// Size of the persistent cache's metadata region, in blocks
    #[serde(default = "default_cache_blocks")]
    cache_blocks: u64,
    workload: Workload,
}

impl RunConfig {
    fn from_yaml(s: &str) -> Result<Self> {
        serde_yaml_ng::from_str(s).map_err(|e| {
            tracing::error!("Invalid configuration: {e}");
            Error::EINVAL
        })
    }
}

#[derive(Parser, Clone, Debug)]
/// Run a simulated device through startup, a random workload, and shutdown
struct Run {
    #[clap(required(true))]
    /// YAML configuration file
    config: PathBuf,
}

impl Run {
    /// Reclaim the emptiest closed bands until at least three are free.
    fn make_room(dev: &mut Dev) -> Result<()> {
        let free = |dev: &Dev| dev.bands().iter()
            .filter(|b| b.state() == BandState::Free)
            .count();
        while free(dev) <= 2 {
            let victim = dev.bands().iter()
                .filter(|b| b.state() == BandState::Closed)
                .min_by_key(|b| b.num_valid())
                .map(Band::id)
                .ok_or(Error::ENOSPC)?;
            dev.relocate(victim)?;
        }
        Ok(())
    }

    async fn main(self) -> Result<()> {
        let s = std::fs::read_to_string(&self.config)?;
        let rc = RunConfig::from_yaml(&s)?;
        let md = MemMdRegion::new(rc.cache_blocks, 1);
        let sd = SimDev::new("sim0", rc.geometry);
        let mut dev = Dev::new(rc.device, Box::new(sd), Box::new(md));
        run_startup(&mut dev).await?;

        let n = dev.num_lbas();
        let bpb = rc.geometry.blocks_per_band();
        // Never fill more than half a band between checks for free space
        let per_poll = rc.workload.per_poll.clamp(1, (bpb / 2).max(1));
        let mut rng = XorShiftRng::seed_from_u64(rc.workload.seed);
        let mut written = 0;
        while written < rc.workload.writes {
            let burst = per_poll.min(rc.workload.writes - written);
            for _ in 0..burst {
                dev.write(rng.gen_range(0..n))?;
            }
            written += burst;
            dev.poll().await?;
            Self::make_room(&mut dev)?;
        }
        run_shutdown(&mut dev).await?;

        let stats = dev.stats();
        println!("{:<16}{:>12}", "user LBAs", n);
        println!("{:<16}{:>12}", "user writes", stats.user_writes);
        println!("{:<16}{:>12}", "gc writes", stats.gc_writes);
        println!("{:<16}{:>12}", "pad writes", stats.pad_writes);
        println!("{:<16}{:>12.4}", "WAF", stats.write_amplification());
        Ok(())
    }
}

#[derive(Args, Clone, Copy, Debug)]
struct GeometryArgs {
    /// Blocks per zone
    #[clap(long)]
    zone_size: u64,
    /// Number of zones on the device
    #[clap(long)]
    zones: u32,
    /// Zones per band
    #[clap(long, default_value = "1")]
    width: u32,
    /// Transfer size, in blocks
    #[clap(long, default_value = "16")]
    xfer: u32,
}

impl GeometryArgs {
    /// Build a band of this geometry, validating everything first.
    fn band(&self, id: BandT) -> Result<Band> {
        let geo = Geometry {
            zone_size: self.zone_size,
            zones: self.zones,
            optimal_open_zones: self.width,
            write_unit_size: self.xfer,
            block_size: 4096,
        };
        if !geo.is_valid() || id >= geo.num_bands() {
            eprintln!("Error: invalid geometry or band");
            return Err(Error::EINVAL);
        }
        Ok(Band::new(id, geo))
    }

    /// Build the band that owns `addr`.
    fn band_for(&self, addr: u64) -> Result<Band> {
        let blocks_per_band = self.zone_size.checked_mul(u64::from(self.width))
            .ok_or(Error::EINVAL)?;
        let id = addr.checked_div(blocks_per_band).ok_or(Error::EINVAL)?;
        let id = BandT::try_from(id).map_err(|_| Error::EINVAL)?;
        self.band(id)
    }
}

#[derive(Parser, Clone, Debug)]
/// Print the address of a band-relative block offset
struct AddrCmd {
    #[clap(flatten)]
    geometry: GeometryArgs,
    band: BandT,
    offset: u64,
}

impl AddrCmd {
    fn main(self) -> Result<()> {
        let band = self.geometry.band(self.band)?;
        if self.offset >= band.capacity() {
            eprintln!("Error: offset exceeds the band's capacity");
            return Err(Error::EINVAL);
        }
        println!("{}", band.addr_from_offset(self.offset));
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Print the band and band-relative offset of an address
struct OffsetCmd {
    #[clap(flatten)]
    geometry: GeometryArgs,
    addr: u64,
}

impl OffsetCmd {
    fn main(self) -> Result<()> {
        let band = self.geometry.band_for(self.addr)?;
        let offset = band.offset_from_addr(Addr(self.addr));
        println!("band {} offset {}", band.id(), offset);
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Advance a band's sequential write pointer
struct NextXferCmd {
    #[clap(flatten)]
    geometry: GeometryArgs,
    addr: u64,
    num_blocks: u64,
}

impl NextXferCmd {
    fn main(self) -> Result<()> {
        let band = self.geometry.band_for(self.addr)?;
        match band.next_xfer_addr(Addr(self.addr), self.num_blocks) {
            Some(addr) => {
                println!("{addr}");
                Ok(())
            }
            None => {
                eprintln!("Error: advancing past the end of band {}",
                    band.id());
                Err(Error::ERANGE)
            }
        }
    }
}

#[derive(Parser, Clone, Debug)]
/// Address translation helpers
enum DebugCmd {
    Addr(AddrCmd),
    Offset(OffsetCmd),
    NextXfer(NextXferCmd),
}

#[derive(Parser, Clone, Debug)]
enum SubCommand {
    #[clap(subcommand)]
    Debug(DebugCmd),
    Run(Run),
}

#[derive(Parser, Clone, Debug)]
#[clap(version = crate_version!())]
struct Cli {
    #[clap(subcommand)]
    cmd: SubCommand,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli: Cli = Cli::parse();
    match cli.cmd {
        SubCommand::Debug(DebugCmd::Addr(cmd)) => cmd.main(),
        SubCommand::Debug(DebugCmd::Offset(cmd)) => cmd.main(),
        SubCommand::Debug(DebugCmd::NextXfer(cmd)) => cmd.main(),
        SubCommand::Run(run) => run.main().await,
    }
}
