//! Built-in catalog of tutorial stacks.
//!
//! Each tutorial is its own stack definition; compound building blocks
//! (`BasesShizzle`, `Skeleton`, `SubnetGroup`) are registered alongside.

use halloumi_plan::filters;
use halloumi_plan::{
    Amount, CompileResult, OutputDeclaration, PropertyDeclaration, Registry, ResourceDeclaration,
    ResourceType, Scope, StackDefinition, Value,
};
use serde_json::json;

type Block = fn(&Scope<'_>) -> CompileResult<Value>;

/// Build a registry holding every tutorial stack
///
/// # Errors
///
/// Returns error if a definition is invalid or registered twice
pub fn registry() -> CompileResult<Registry> {
    let mut registry = Registry::new();
    for stack in [
        empty()?,
        resource_anatomy()?,
        vpc_and_subnets()?,
        vpc_flow_logs()?,
        lambda()?,
        bases_shizzle()?,
        compound_bases()?,
        skeleton()?,
        subnet_group()?,
        subnet_groups()?,
    ] {
        registry.register(stack)?;
    }
    Ok(registry)
}

fn provider(tag: &str) -> ResourceType {
    ResourceType::provider(tag)
}

fn reference(scope: &Scope<'_>, name: &str) -> CompileResult<Value> {
    Ok(scope.resource(name)?.reference())
}

fn availability_zone(index: usize) -> Value {
    Value::from(json!({"Fn::Select": [index, {"Fn::GetAZs": ""}]}))
}

fn empty() -> CompileResult<StackDefinition> {
    StackDefinition::builder("empty")
        .description("Building a CloudFormation template")
        .build()
}

fn resource_anatomy() -> CompileResult<StackDefinition> {
    StackDefinition::builder("resource_anatomy")
        .description("Resource anatomy: properties, resources, and outputs")
        .property(PropertyDeclaration::new("cidr").env("CIDR").default_value("10.0.0.0/16"))
        .resource(
            ResourceDeclaration::new("vpcs", provider("AWS::EC2::VPC")).configure(|r, _| {
                r.property("cidr_block", |scope| scope.property("cidr"));
            }),
        )
        .output(OutputDeclaration::new("vpcs", "cidr").block(|scope, vpc| scope.read(vpc, "cidr_block")))
        .build()
}

fn vpc_and_subnets() -> CompileResult<StackDefinition> {
    let vpc_id: Block = |scope| reference(scope, "vpc");
    StackDefinition::builder("vpc_and_subnets")
        .description("VPC with three public and three private subnets")
        .resource(
            ResourceDeclaration::new("vpcs", provider("AWS::EC2::VPC")).configure(|r, _| {
                r.literal("cidr_block", "10.0.0.0/16")
                    .literal("enable_dns_support", true)
                    .literal("enable_dns_hostnames", true);
            }),
        )
        .resource(
            ResourceDeclaration::new("public_subnets", provider("AWS::EC2::Subnet"))
                .amount(3)
                .configure(move |r, index| {
                    r.property("vpc_id", vpc_id)
                        .literal("cidr_block", format!("10.0.{}.0/24", index))
                        .literal("availability_zone", availability_zone(index))
                        .literal("map_public_ip_on_launch", true);
                }),
        )
        .resource(ResourceDeclaration::new("internet_gateways", provider("AWS::EC2::InternetGateway")))
        .resource(
            ResourceDeclaration::new("vpc_gateway_attachments", provider("AWS::EC2::VPCGatewayAttachment"))
                .configure(move |r, _| {
                    r.property("vpc_id", vpc_id)
                        .property("internet_gateway_id", |scope| reference(scope, "internet_gateway"));
                }),
        )
        .resource(
            ResourceDeclaration::new("route_tables", provider("AWS::EC2::RouteTable"))
                .configure(move |r, _| {
                    r.property("vpc_id", vpc_id);
                }),
        )
        .resource(
            ResourceDeclaration::new("routes", provider("AWS::EC2::Route")).configure(|r, _| {
                r.depends_on(|scope| Ok(scope.resource("vpc_gateway_attachment")?.id_value()))
                    .literal("destination_cidr_block", "0.0.0.0/0")
                    .property("gateway_id", |scope| reference(scope, "internet_gateway"))
                    .property("route_table_id", |scope| reference(scope, "route_table"));
            }),
        )
        .resource(
            ResourceDeclaration::new("private_subnets", provider("AWS::EC2::Subnet"))
                .amount(3)
                .configure(move |r, index| {
                    r.property("vpc_id", vpc_id)
                        .literal("cidr_block", format!("10.0.{}.0/24", index + 3))
                        .literal("availability_zone", availability_zone(index));
                }),
        )
        .resource(
            ResourceDeclaration::new(
                "public_subnet_route_table_associations",
                provider("AWS::EC2::SubnetRouteTableAssociation"),
            )
            .amount_from(Amount::dynamic(["public_subnets"], |scope| {
                Ok(scope.resources("public_subnets")?.len())
            }))
            .configure(|r, _| {
                r.property("route_table_id", |scope| reference(scope, "route_table"))
                    .property("subnet_id", |scope| {
                        scope
                            .resources("public_subnets")?
                            .get(scope.index())
                            .map(|subnet| subnet.reference())
                            .ok_or_else(|| scope.fail("no public subnet for this index"))
                    });
            }),
        )
        .build()
}

fn vpc_flow_logs() -> CompileResult<StackDefinition> {
    StackDefinition::builder("vpc_flow_logs")
        .description("VPC with flow logs delivered to CloudWatch Logs")
        .resource(
            ResourceDeclaration::new("vpcs", provider("AWS::EC2::VPC")).configure(|r, _| {
                r.literal("cidr_block", "10.0.0.0/16");
            }),
        )
        .resource(
            ResourceDeclaration::new("vpc_flow_log_policies", provider("AWS::IAM::Role")).configure(
                |r, _| {
                    r.literal("path", "/")
                        .literal(
                            "assume_role_policy_document",
                            json!({
                                "Version": "2012-10-17",
                                "Statement": [{
                                    "Effect": "Allow",
                                    "Principal": {"Service": "vpc-flow-logs.amazonaws.com"},
                                    "Action": ["sts:AssumeRole"]
                                }]
                            }),
                        )
                        .literal(
                            "policies",
                            json!([{
                                "PolicyName": "FlowLogPolicy",
                                "PolicyDocument": {
                                    "Statement": [{
                                        "Action": [
                                            "logs:CreateLogGroup",
                                            "logs:CreateLogStream",
                                            "logs:PutLogEvents",
                                            "logs:DescribeLogGroups",
                                            "logs:DescribeLogStreams"
                                        ],
                                        "Effect": "Allow",
                                        "Resource": "*"
                                    }]
                                }
                            }]),
                        );
                },
            ),
        )
        .resource(
            ResourceDeclaration::new("vpc_flow_log_groups", provider("AWS::Logs::LogGroup")).configure(
                |r, _| {
                    r.property("log_group_name", |scope| {
                        let vpc = scope.resource("vpc")?;
                        Ok(Value::from(format!("/vpc/flow-logs/{}", vpc.logical_id())))
                    })
                    .literal("retention_in_days", 30);
                },
            ),
        )
        .resource(
            ResourceDeclaration::new("vpc_flow_logs", provider("AWS::EC2::FlowLog")).configure(
                |r, _| {
                    r.property("deliver_logs_permission_arn", |scope| {
                        Ok(scope.resource("vpc_flow_log_policy")?.ref_arn())
                    })
                    .property("log_group_name", |scope| reference(scope, "vpc_flow_log_group"))
                    .property("resource_id", |scope| reference(scope, "vpc"))
                    .literal("resource_type", "VPC")
                    .literal("traffic_type", "ALL");
                },
            ),
        )
        .build()
}

fn lambda() -> CompileResult<StackDefinition> {
    StackDefinition::builder("lambda")
        .description("Scheduled Lambda function with error alarms")
        .property(
            PropertyDeclaration::new("alarm_email_addresses")
                .env("ALARM_EMAIL_ADDRESSES")
                .required()
                .default_value("john.doe@example.com")
                .filter(filters::string_to_array()),
        )
        .property(
            PropertyDeclaration::new("example_lambda_archive")
                .env("EXAMPLE_LAMBDA_ARCHIVE")
                .required()
                .default_value("example-lambda-function.zip"),
        )
        .property(
            PropertyDeclaration::new("example_lambda_bucket")
                .env("EXAMPLE_LAMBDA_BUCKET")
                .required()
                .default_value("example-lambda-bucket"),
        )
        .property(
            PropertyDeclaration::new("example_lambda_function_errors_alarm_threshold")
                .env("EXAMPLE_LAMBDA_ERRORS_ALARM_THRESHOLD")
                .default_value(1)
                .filter(filters::to_integer()),
        )
        .property(
            PropertyDeclaration::new("example_lambda_memory_size")
                .env("EXAMPLE_LAMBDA_MEMORY_SIZE")
                .default_value(128)
                .filter(filters::to_integer()),
        )
        .property(
            PropertyDeclaration::new("example_lambda_timeout")
                .env("EXAMPLE_LAMBDA_TIMEOUT")
                .default_value(300)
                .filter(filters::to_integer()),
        )
        .resource(
            ResourceDeclaration::new("example_lambda_alarm_topics", provider("AWS::SNS::Topic"))
                .configure(|r, _| {
                    r.property("subscription", |scope| {
                        let emails = scope.property("alarm_email_addresses")?;
                        Ok(Value::list(emails.as_list().unwrap_or_default().iter().map(|email| {
                            Value::object([("Endpoint", email.clone()), ("Protocol", Value::from("email"))])
                        })))
                    });
                }),
        )
        .resource(
            ResourceDeclaration::new("example_lambda_roles", provider("AWS::IAM::Role")).configure(
                |r, _| {
                    r.literal("path", "/").literal(
                        "assume_role_policy_document",
                        json!({
                            "Version": "2012-10-17",
                            "Statement": [{
                                "Effect": "Allow",
                                "Principal": {"Service": ["lambda.amazonaws.com"]},
                                "Action": ["sts:AssumeRole"]
                            }]
                        }),
                    );
                },
            ),
        )
        .resource(
            ResourceDeclaration::new("example_lamba_permissions", provider("AWS::Lambda::Permission"))
                .configure(|r, _| {
                    r.depends_on(|scope| Ok(scope.resource("example_lambda_function")?.id_value()))
                        .literal("action", "lambda:InvokeFunction")
                        .literal("principal", "events.amazonaws.com")
                        .property("source_arn", |scope| {
                            Ok(scope.resource("example_lambda_event")?.ref_arn())
                        })
                        .property("function_name", |scope| reference(scope, "example_lambda_function"));
                }),
        )
        .resource(
            ResourceDeclaration::new("example_lambda_events", provider("AWS::Events::Rule")).configure(
                |r, _| {
                    r.literal("schedule_expression", "rate(1 day)")
                        .literal("state", "ENABLED")
                        .property("targets", |scope| {
                            let function = scope.resource("example_lambda_function")?;
                            Ok(Value::list([Value::object([
                                ("Arn", function.ref_arn()),
                                ("Id", function.reference()),
                            ])]))
                        })
                        .literal("name", "ExampleLambdaFunctionEvent");
                },
            ),
        )
        .resource(
            ResourceDeclaration::new("example_lambda_functions", provider("AWS::Lambda::Function"))
                .configure(|r, _| {
                    r.depends_on(|scope| Ok(scope.resource("example_lambda_role")?.id_value()))
                        .property("code", |scope| {
                            Ok(Value::object([
                                ("S3Bucket", scope.property("example_lambda_bucket")?),
                                ("S3Key", scope.property("example_lambda_archive")?),
                            ]))
                        })
                        .literal(
                            "environment",
                            json!({"Variables": {"EXAMPLE_VARIABLE_KEY": "example_value"}}),
                        )
                        .literal("handler", "index.lambda_handler")
                        .property("memory_size", |scope| scope.property("example_lambda_memory_size"))
                        .property("role", |scope| Ok(scope.resource("example_lambda_role")?.ref_arn()))
                        .literal("runtime", "python3.6")
                        .property("timeout", |scope| scope.property("example_lambda_timeout"));
                }),
        )
        .resource(
            ResourceDeclaration::new(
                "example_lambda_function_errors_alarms",
                provider("AWS::CloudWatch::Alarm"),
            )
            .configure(|r, _| {
                r.depends_on(|scope| {
                    Ok(Value::list([
                        scope.resource("example_lambda_function")?.id_value(),
                        scope.resource("example_lambda_alarm_topic")?.id_value(),
                    ]))
                })
                .property("alarm_actions", |scope| {
                    let topics = scope.resources("example_lambda_alarm_topics")?;
                    Ok(Value::list(topics.iter().map(|topic| topic.reference())))
                })
                .literal("alarm_description", "Alarm for Example Lambda Function Errors")
                .literal("comparison_operator", "GreaterThanOrEqualToThreshold")
                .literal("evaluation_periods", 1)
                .literal("metric_name", "Errors")
                .property("dimensions", |scope| {
                    Ok(Value::list([Value::object([
                        ("Name", Value::from("FunctionName")),
                        ("Value", scope.resource("example_lambda_function")?.reference()),
                    ])]))
                })
                .literal("namespace", "AWS/Lambda")
                .literal("period", 60)
                .literal("statistic", "Sum")
                .property("threshold", |scope| {
                    scope.property("example_lambda_function_errors_alarm_threshold")
                })
                .literal("treat_missing_data", "notBreaching");
            }),
        )
        .output(
            OutputDeclaration::new("example_lambda_function", "arn")
                .block(|_, function| Ok(function.ref_arn()))
                .exported(),
        )
        .build()
}

fn bases_shizzle() -> CompileResult<StackDefinition> {
    StackDefinition::builder("BasesShizzle")
        .description("A VPC with two subnets, for use as a compound resource")
        .resource(
            ResourceDeclaration::new("vpcs", provider("AWS::EC2::VPC")).configure(|r, _| {
                r.literal("cidr_block", "10.0.0.0/16");
            }),
        )
        .resource(
            ResourceDeclaration::new("subnets", provider("AWS::EC2::Subnet"))
                .amount(2)
                .configure(|r, index| {
                    r.property("vpc_id", |scope| reference(scope, "vpc"))
                        .literal("cidr_block", format!("10.0.{}.0/24", index));
                }),
        )
        .output(OutputDeclaration::new("vpc", "id").block(|_, vpc| Ok(vpc.reference())))
        .build()
}

fn compound_bases() -> CompileResult<StackDefinition> {
    StackDefinition::builder("compound_bases")
        .description("Example compound resource")
        .resource(ResourceDeclaration::new("bases", ResourceType::compound("BasesShizzle")))
        .build()
}

fn skeleton() -> CompileResult<StackDefinition> {
    StackDefinition::builder("Skeleton")
        .description("VPC with an attached internet gateway")
        .property(PropertyDeclaration::new("cidr").env("VPC_CIDR").default_value("10.0.0.0/16"))
        .resource(
            ResourceDeclaration::new("vpcs", provider("AWS::EC2::VPC")).configure(|r, _| {
                r.property("cidr_block", |scope| scope.property("cidr"))
                    .literal("enable_dns_support", true)
                    .literal("enable_dns_hostnames", true);
            }),
        )
        .resource(ResourceDeclaration::new("internet_gateways", provider("AWS::EC2::InternetGateway")))
        .resource(
            ResourceDeclaration::new("vpc_gateway_attachments", provider("AWS::EC2::VPCGatewayAttachment"))
                .configure(|r, _| {
                    r.property("vpc_id", |scope| reference(scope, "vpc"))
                        .property("internet_gateway_id", |scope| reference(scope, "internet_gateway"));
                }),
        )
        .output(OutputDeclaration::new("vpc", "id").block(|_, vpc| Ok(vpc.reference())).exported())
        .output(
            OutputDeclaration::new("internet_gateway", "id")
                .block(|_, gateway| Ok(gateway.reference())),
        )
        .build()
}

fn subnet_group() -> CompileResult<StackDefinition> {
    StackDefinition::builder("SubnetGroup")
        .description("One subnet per availability zone sharing a route table")
        .property(
            PropertyDeclaration::new("service_ip_offset")
                .default_value(0)
                .filter(filters::to_integer()),
        )
        .property(PropertyDeclaration::new("private").default_value(false).filter(filters::to_boolean()))
        .property(
            PropertyDeclaration::new("subnet_count")
                .env("SUBNETS_PER_GROUP")
                .default_value(3)
                .filter(filters::to_integer()),
        )
        .resource(ResourceDeclaration::new("skeletons", ResourceType::compound("Skeleton")))
        .resource(
            ResourceDeclaration::new("subnets", provider("AWS::EC2::Subnet"))
                .amount_from(Amount::dynamic(Vec::<String>::new(), |scope| {
                    let count = scope.property("subnet_count")?;
                    count
                        .as_i64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| scope.fail("subnet_count must be a non-negative integer"))
                }))
                .reads(["skeletons"])
                .configure(|r, index| {
                    r.property("vpc_id", |scope| {
                        let skeleton = scope.resource("skeleton")?;
                        scope.read(&skeleton, "vpc_id")
                    })
                    .property("cidr_block", move |scope| {
                        let offset = scope.property("service_ip_offset")?.as_i64().unwrap_or(0);
                        let count = scope.property("subnet_count")?.as_i64().unwrap_or(0);
                        let block = offset * count + i64::try_from(index).unwrap_or(0);
                        Ok(Value::from(format!("10.0.{}.0/24", block)))
                    })
                    .literal("availability_zone", availability_zone(index))
                    .property("map_public_ip_on_launch", |scope| {
                        let private = scope.property("private")?.as_bool().unwrap_or(false);
                        Ok(Value::from(!private))
                    });
                }),
        )
        .resource(
            ResourceDeclaration::new("route_tables", provider("AWS::EC2::RouteTable"))
                .reads(["skeletons"])
                .configure(|r, _| {
                    r.property("vpc_id", |scope| {
                        let skeleton = scope.resource("skeleton")?;
                        scope.read(&skeleton, "vpc_id")
                    });
                }),
        )
        .resource(
            ResourceDeclaration::new("route_table_associations", provider("AWS::EC2::SubnetRouteTableAssociation"))
                .amount_from(Amount::dynamic(["subnets"], |scope| {
                    Ok(scope.resources("subnets")?.len())
                }))
                .configure(|r, _| {
                    r.property("route_table_id", |scope| reference(scope, "route_table"))
                        .property("subnet_id", |scope| {
                            scope
                                .resources("subnets")?
                                .get(scope.index())
                                .map(|subnet| subnet.reference())
                                .ok_or_else(|| scope.fail("no subnet for this index"))
                        });
                }),
        )
        .output(OutputDeclaration::new("subnets", "id").block(|_, subnet| Ok(subnet.reference())))
        .build()
}

fn subnet_groups() -> CompileResult<StackDefinition> {
    StackDefinition::builder("subnet_groups")
        .description("VPC skeleton with public and private subnet groups")
        .resource(ResourceDeclaration::new("skeletons", ResourceType::compound("Skeleton")))
        .resource(
            ResourceDeclaration::new("public_subnet_groups", ResourceType::compound("SubnetGroup"))
                .reads(["skeletons"])
                .configure(|r, _| {
                    r.resources("skeletons", |scope| scope.resources("skeletons"))
                        .literal("service_ip_offset", 0);
                }),
        )
        .resource(
            ResourceDeclaration::new("private_subnet_groups", ResourceType::compound("SubnetGroup"))
                .reads(["skeletons"])
                .configure(|r, _| {
                    r.resources("skeletons", |scope| scope.resources("skeletons"))
                        .literal("service_ip_offset", 1)
                        .literal("private", true);
                }),
        )
        .build()
}
