//! Runner mapping each subcommand onto a resolved target

use crate::cli::args::{Args, Command};
use crate::content::{ReadOnlyTarget, resolve_platform};
use crate::error::{Result, TargetError};
use crate::logging::Logger;
use crate::option::{Common, Platform, Target, parse_all};

pub struct Runner {
    args: Args,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let output = args.common.logger();
        Self { args, output }
    }

    pub fn logger(&self) -> &Logger {
        &self.output
    }

    pub async fn run(&self) -> Result<()> {
        let mut common = self.args.common.clone();
        match self.args.command.clone() {
            Command::Resolve {
                target,
                platform,
                short,
            } => self.resolve(&mut common, target, platform, short).await,
            Command::Tags { mut target } => {
                parse_all(&mut [&mut common, &mut target], &self.output)?;
                let handle = target.new_readonly_target(&common, &self.output)?;
                self.output
                    .verbose(&format!("Listing tags of {}", target.annotated_reference()));
                for tag in handle.tags().await? {
                    println!("{}", tag);
                }
                Ok(())
            }
            Command::Referrers {
                mut target,
                artifact_type,
            } => {
                parse_all(&mut [&mut common, &mut target], &self.output)?;
                let handle = target.new_readonly_target(&common, &self.output)?;
                target.ensure_reference_not_empty()?;
                let repository = handle.as_repository().ok_or_else(|| {
                    TargetError::Validation(format!(
                        "referrers are only listed for registry targets, got {}",
                        target.annotated_reference()
                    ))
                })?;

                let subject = handle.resolve(&target.reference).await?;
                self.output.verbose(&format!(
                    "Listing referrers of {} ({})",
                    target.annotated_reference(),
                    subject.short_digest()
                ));
                for referrer in repository
                    .referrers(&subject.digest, artifact_type.as_deref())
                    .await?
                {
                    println!(
                        "{} {}",
                        referrer.digest,
                        referrer.artifact_type.as_deref().unwrap_or(&referrer.media_type)
                    );
                }
                Ok(())
            }
        }
    }

    async fn resolve(
        &self,
        common: &mut Common,
        mut target: Target,
        mut platform: Platform,
        short: bool,
    ) -> Result<()> {
        parse_all(&mut [&mut *common, &mut target, &mut platform], &self.output)?;
        let handle = target.new_readonly_target(common, &self.output)?;
        target.ensure_reference_not_empty()?;

        let descriptor = resolve_platform(&handle, &target.reference, platform.spec.as_ref()).await?;
        if short {
            println!("{}", descriptor.digest);
        } else {
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        Ok(())
    }
}
