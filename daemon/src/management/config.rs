use craftd_protocol::management::instance::InstanceConfig;

use super::comm::process::ProcessStartInfo;

pub trait InstanceConfigExt {
    fn start_info(&self, java_path: &str) -> ProcessStartInfo;
}

impl InstanceConfigExt for InstanceConfig {
    /// `java -Xms… -Xmx… <extra args> -jar <jarFile> nogui`, relative to
    /// the instance working directory. Empty memory bounds are skipped.
    fn start_info(&self, java_path: &str) -> ProcessStartInfo {
        let mut args = vec![];
        if !self.java_args.xms.is_empty() {
            args.push(format!("-Xms{}", self.java_args.xms));
        }
        if !self.java_args.xmx.is_empty() {
            args.push(format!("-Xmx{}", self.java_args.xmx));
        }
        args.extend_from_slice(self.java_args.args.as_slice());
        args.push("-jar".into());
        args.push(self.jar_file.clone());
        args.push("nogui".into());

        ProcessStartInfo {
            target: java_path.to_string(),
            args,
        }
    }
}
