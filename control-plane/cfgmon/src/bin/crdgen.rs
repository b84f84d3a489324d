use cfgmon::crd::monitored_service::MonitoredService;
use kube::core::CustomResourceExt;

fn main() {
    let crd = MonitoredService::crd();
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}
