//! Prints the MariaDB CustomResourceDefinition as YAML

use kube::CustomResourceExt;
use mariadb_k8s::crd::MariaDB;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&MariaDB::crd())?);
    Ok(())
}
