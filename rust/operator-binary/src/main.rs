mod config;
mod controller;
mod crd;
mod events;
mod field_injector;
mod file_emitter;
mod index;
mod interceptor_rewriter;
mod listers;
mod model;
mod path_resolver;
mod rawconfig;
mod source_expander;
mod synthesiser;
mod validation;

use std::sync::Arc;

use clap::{crate_description, crate_version, Parser};
use futures::{future, stream::StreamExt};
use stackable_operator::{
    cli::{Command, ProductOperatorRun},
    k8s_openapi::api::core::v1::{Node, Pod},
    kube::{
        runtime::{
            events::{Recorder, Reporter},
            reflector, watcher, Controller,
        },
        Api,
    },
    logging::controller::report_controller_reconciled,
    CustomResourceExt,
};
use tokio::sync::Mutex;

use crate::{
    config::{Config, ContainerRuntime, FieldsConfig},
    controller::{Ctx, LOG_CONFIG_CONTROLLER_NAME},
    crd::{Interceptor, LogConfig, Sink},
    index::IndexStore,
    listers::{ClusterStoreCache, StoreCache},
};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const OPERATOR_NAME: &str = "loggie.stackable.tech";
const NODE_NAME_ENV: &str = "NODE_NAME";

#[derive(Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => {
            LogConfig::print_yaml_schema(built_info::PKG_VERSION)?;
            Sink::print_yaml_schema(built_info::PKG_VERSION)?;
            Interceptor::print_yaml_schema(built_info::PKG_VERSION)?;
        }
        Command::Run(ProductOperatorRun {
            product_config: _,
            watch_namespace,
            tracing_target,
            cluster_info_opts,
        }) => {
            stackable_operator::logging::initialize_logging(
                "LOGGIE_OPERATOR_LOG",
                "loggie-operator",
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET,
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );

            let client = stackable_operator::client::initialize_operator(
                Some(OPERATOR_NAME.to_string()),
                &cluster_info_opts,
            )
            .await?;

            let config = load_runtime_config();
            let local_node_name = std::env::var(NODE_NAME_ENV).unwrap_or_default();
            tracing::info!(node = %local_node_name, "starting discovery controller for node");

            let event_recorder = Arc::new(Recorder::new(
                client.as_kube_client(),
                Reporter {
                    controller: LOG_CONFIG_CONTROLLER_NAME.to_string(),
                    instance: None,
                },
            ));

            let log_config_api: Api<LogConfig> = watch_namespace.get_api(&client);
            let pod_api: Api<Pod> = watch_namespace.get_api(&client);
            let node_api: Api<Node> = Api::all(client.as_kube_client());
            let sink_api: Api<Sink> = watch_namespace.get_api(&client);
            let interceptor_api: Api<Interceptor> = watch_namespace.get_api(&client);

            let log_config_controller =
                Controller::new(log_config_api, watcher::Config::default());
            let log_configs_store = log_config_controller.store();

            let pod_controller = Controller::new(pod_api, watcher::Config::default());
            let pods_store = pod_controller.store();

            let node_controller = Controller::new(node_api, watcher::Config::default());
            let nodes_store = node_controller.store();

            let (sinks_store, sinks_writer) = reflector::store();
            let (interceptors_store, interceptors_writer) = reflector::store();
            tokio::spawn(
                reflector::reflector(
                    sinks_writer,
                    watcher::watcher(sink_api, watcher::Config::default()),
                )
                .for_each(|_| future::ready(())),
            );
            tokio::spawn(
                reflector::reflector(
                    interceptors_writer,
                    watcher::watcher(interceptor_api, watcher::Config::default()),
                )
                .for_each(|_| future::ready(())),
            );

            let ctx = Arc::new(Ctx {
                config,
                local_node_name,
                log_configs: Arc::new(StoreCache(log_configs_store)),
                pods: Arc::new(StoreCache(pods_store)),
                nodes: Arc::new(ClusterStoreCache(nodes_store)),
                sinks: Arc::new(StoreCache(sinks_store)),
                interceptors: Arc::new(StoreCache(interceptors_store)),
                index: Mutex::new(IndexStore::default()),
                node_labels: Mutex::new(Default::default()),
                events: Arc::new(events::RecorderPublisher(Recorder::new(
                    client.as_kube_client(),
                    Reporter {
                        controller: LOG_CONFIG_CONTROLLER_NAME.to_string(),
                        instance: None,
                    },
                ))),
            });

            let log_config_stream = log_config_controller.shutdown_on_signal().run(
                controller::reconcile_log_config,
                controller::error_policy_log_config,
                ctx.clone(),
            );
            let pod_stream = pod_controller.shutdown_on_signal().run(
                controller::reconcile_pod,
                controller::error_policy_pod,
                ctx.clone(),
            );
            let node_stream = node_controller.shutdown_on_signal().run(
                controller::reconcile_node,
                controller::error_policy_node,
                ctx,
            );

            let log_config_reporter = event_recorder.clone();
            let log_config_fut = log_config_stream.for_each_concurrent(16, move |result| {
                let event_recorder = log_config_reporter.clone();
                async move {
                    report_controller_reconciled(&event_recorder, LOG_CONFIG_CONTROLLER_NAME, &result)
                        .await;
                }
            });
            let pod_fut = pod_stream.for_each_concurrent(16, |result| {
                future::ready(if let Err(err) = result {
                    tracing::warn!(%err, "pod reconcile failed");
                })
            });
            let node_fut = node_stream.for_each_concurrent(4, |result| {
                future::ready(if let Err(err) = result {
                    tracing::warn!(%err, "node reconcile failed");
                })
            });

            tokio::join!(log_config_fut, pod_fut, node_fut);
        }
    }

    Ok(())
}

fn load_runtime_config() -> Config {
    let container_runtime = match std::env::var("LOGGIE_CONTAINER_RUNTIME").as_deref() {
        Ok("containerd") => ContainerRuntime::Containerd,
        Ok("docker") => ContainerRuntime::Docker,
        _ => ContainerRuntime::default(),
    };
    Config {
        config_file_path: std::env::var("LOGGIE_CONFIG_FILE_PATH")
            .unwrap_or_else(|_| "/stackable/log_config".to_string())
            .into(),
        container_runtime,
        docker_data_root: std::env::var("LOGGIE_DOCKER_DATA_ROOT")
            .unwrap_or_else(|_| "/var/lib/docker".to_string())
            .into(),
        pod_log_dir_prefix: std::env::var("LOGGIE_POD_LOG_DIR_PREFIX")
            .unwrap_or_else(|_| "/var/log/pods".to_string())
            .into(),
        kubelet_root_dir: std::env::var("LOGGIE_KUBELET_ROOT_DIR")
            .unwrap_or_else(|_| "/var/lib/kubelet".to_string())
            .into(),
        fields: FieldsConfig {
            namespace: std::env::var("LOGGIE_FIELD_NAMESPACE").unwrap_or_default(),
            node_name: std::env::var("LOGGIE_FIELD_NODE_NAME").unwrap_or_default(),
            pod_name: std::env::var("LOGGIE_FIELD_POD_NAME").unwrap_or_else(|_| "pod".to_string()),
            container_name: std::env::var("LOGGIE_FIELD_CONTAINER_NAME")
                .unwrap_or_else(|_| "container".to_string()),
            log_config: std::env::var("LOGGIE_FIELD_LOG_CONFIG").unwrap_or_default(),
        },
        cluster: std::env::var("LOGGIE_CLUSTER").unwrap_or_default(),
    }
}
